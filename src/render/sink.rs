use crate::foundation::error::PyramidResult;
use crate::geometry::aabb::BoundingBox;
use crate::geometry::address::TreePath;
use crate::volume::array::Volume;

/// Consumer of finished nodes.
///
/// Ordering contract: a node is accepted only after every one of its descendants. `node` is
/// `None` during address enumeration, where no pixels are produced. Returning `Err` aborts the
/// whole build.
pub trait NodeSink {
    fn accept(
        &mut self,
        node: Option<&Volume>,
        path: &TreePath,
        bbox: &BoundingBox,
    ) -> PyramidResult<()>;
}

impl<F> NodeSink for F
where
    F: FnMut(Option<&Volume>, &TreePath, &BoundingBox) -> PyramidResult<()>,
{
    fn accept(
        &mut self,
        node: Option<&Volume>,
        path: &TreePath,
        bbox: &BoundingBox,
    ) -> PyramidResult<()> {
        self(node, path, bbox)
    }
}

/// Source of previously rendered nodes for targeted rebuild.
///
/// `Ok(None)` means the node does not exist (nothing was rendered there).
pub trait NodeLoader {
    fn load(&mut self, path: &TreePath) -> PyramidResult<Option<Volume>>;
}

impl<F> NodeLoader for F
where
    F: FnMut(&TreePath) -> PyramidResult<Option<Volume>>,
{
    fn load(&mut self, path: &TreePath) -> PyramidResult<Option<Volume>> {
        self(path)
    }
}

/// One accepted node as recorded by [`InMemorySink`].
#[derive(Debug, Clone)]
pub struct SunkNode {
    pub path: TreePath,
    pub bbox: BoundingBox,
    pub volume: Option<Volume>,
}

/// In-memory sink for tests and debugging.
#[derive(Debug, Default)]
pub struct InMemorySink {
    nodes: Vec<SunkNode>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Nodes in the order they were accepted.
    pub fn nodes(&self) -> &[SunkNode] {
        &self.nodes
    }

    pub fn paths(&self) -> Vec<TreePath> {
        self.nodes.iter().map(|n| n.path.clone()).collect()
    }

    pub fn get(&self, path: &TreePath) -> Option<&SunkNode> {
        self.nodes.iter().find(|n| &n.path == path)
    }

    pub fn into_nodes(self) -> Vec<SunkNode> {
        self.nodes
    }
}

impl NodeSink for InMemorySink {
    fn accept(
        &mut self,
        node: Option<&Volume>,
        path: &TreePath,
        bbox: &BoundingBox,
    ) -> PyramidResult<()> {
        self.nodes.push(SunkNode {
            path: path.clone(),
            bbox: bbox.clone(),
            volume: node.cloned(),
        });
        Ok(())
    }
}

/// Loads nodes back out of an [`InMemorySink`].
impl NodeLoader for InMemorySink {
    fn load(&mut self, path: &TreePath) -> PyramidResult<Option<Volume>> {
        Ok(self.get(path).and_then(|n| n.volume.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::array::PixelType;

    #[test]
    fn in_memory_sink_records_in_order_and_loads_back() {
        let mut sink = InMemorySink::new();
        let bbox = BoundingBox::zeros(3);
        let v = Volume::new(vec![1, 1, 1], PixelType::U8);
        sink.accept(Some(&v), &TreePath::from_ids(vec![1]), &bbox)
            .unwrap();
        sink.accept(None, &TreePath::root(), &bbox).unwrap();
        assert_eq!(
            sink.paths(),
            vec![TreePath::from_ids(vec![1]), TreePath::root()]
        );
        assert!(sink.load(&TreePath::from_ids(vec![1])).unwrap().is_some());
        assert!(sink.load(&TreePath::root()).unwrap().is_none());
        assert!(sink.load(&TreePath::from_ids(vec![2])).unwrap().is_none());
    }

    #[test]
    fn closures_are_sinks_and_loaders() {
        let mut count = 0usize;
        {
            let mut sink = |_: Option<&Volume>, _: &TreePath, _: &BoundingBox| -> PyramidResult<()> {
                count += 1;
                Ok(())
            };
            sink.accept(None, &TreePath::root(), &BoundingBox::zeros(2))
                .unwrap();
        }
        assert_eq!(count, 1);

        let mut loader = |p: &TreePath| -> PyramidResult<Option<Volume>> {
            Ok(Some(Volume::new(vec![p.len() + 1], PixelType::U8)))
        };
        let v = loader.load(&TreePath::from_ids(vec![0, 0])).unwrap().unwrap();
        assert_eq!(v.dims(), &[3]);
    }
}
