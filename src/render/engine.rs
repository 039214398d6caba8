//! Recursive pyramid construction.
//!
//! A box is either a leaf (few enough voxels to render straight from tiles) or an internal node
//! built by compositing its rendered children. Every node is handed to the sink after all of its
//! descendants, so a sink that persists nodes leaves a resumable checkpoint behind.

use crate::foundation::error::{PyramidError, PyramidResult};
use crate::geometry::aabb::BoundingBox;
use crate::geometry::address::TreePath;
use crate::geometry::transform::{SPATIAL_AXES, Transform};
use crate::render::filter::SeparableFilter;
use crate::render::opts::RenderOpts;
use crate::render::pool::{Node, WorkspacePool, WorkspacePoolStats};
use crate::render::sink::{NodeLoader, NodeSink};
use crate::render::splitter::SlabPlan;
use crate::tiles::tile::TileSet;
use crate::volume::array::{PixelType, Volume};
use crate::volume::resample::affine_resample;

/// What a traversal does at each node.
enum Mode<'a> {
    /// Render every node.
    Render,
    /// Emit addresses of nodes any tile touches, without pixel work. With a prefix, only nodes
    /// under it are emitted.
    Addresses { prefix: Option<TreePath> },
    /// Render only `target`, composing an internal target from `loader` results.
    Target {
        target: TreePath,
        loader: &'a mut dyn NodeLoader,
    },
}

/// Counters reported at the end of a build.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BuildSummary {
    /// Nodes handed to the sink.
    pub nodes: u64,
    pub leaves: u64,
    /// Subtrees abandoned after a local error.
    pub dropped_subtrees: u64,
    pub pool_capacity: usize,
    pub pool: WorkspacePoolStats,
}

/// Decides where subdivision stops.
#[derive(Clone, Copy, Debug)]
struct LeafRule {
    nchildren: usize,
    voxel_nm: [f64; 3],
    voxel_volume: f64,
    countof_leaf: u64,
}

impl LeafRule {
    fn new(opts: &RenderOpts) -> Self {
        Self {
            nchildren: opts.nchildren,
            voxel_nm: opts.voxel_nm(),
            voxel_volume: opts.voxel_volume_nm3(),
            countof_leaf: opts.countof_leaf,
        }
    }

    /// Number of leading axes split at each level.
    fn nsplit(&self) -> usize {
        self.nchildren.trailing_zeros() as usize
    }

    /// A box stops splitting once it is small enough, or once halving a split axis would leave
    /// less than one leaf voxel on it.
    fn is_leaf(&self, bbox: &BoundingBox) -> bool {
        let count = bbox.volume() / self.voxel_volume;
        let too_thin = bbox
            .shape()
            .iter()
            .zip(self.voxel_nm)
            .take(self.nsplit())
            .any(|(&e, v)| (e as f64) < 2.0 * v);
        count < self.countof_leaf as f64 || too_thin
    }

    /// Levels from `bbox` down to its deepest leaf, counting both ends.
    fn path_length(&self, bbox: &BoundingBox) -> PyramidResult<usize> {
        let mut n = 1;
        let mut b = bbox.clone();
        while !self.is_leaf(&b) {
            // The last child takes the high half of every split axis, so it is never smaller.
            let mut children = b.subdivide(self.nchildren)?;
            b = children
                .pop()
                .ok_or_else(|| PyramidError::validation("subdivision produced no children"))?;
            n += 1;
        }
        Ok(n)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Children {
    Descend,
    Load,
}

struct Engine<'a> {
    tiles: &'a TileSet,
    sink: &'a mut dyn NodeSink,
    mode: Mode<'a>,
    rule: LeafRule,
    voxel_nm: [f64; 3],
    device_free_bytes: Option<u64>,
    pool: WorkspacePool,
    input_filter: SeparableFilter,
    output_filter: SeparableFilter,
    input: Volume,
    summary: BuildSummary,
}

impl<'a> Engine<'a> {
    fn new(
        opts: &RenderOpts,
        tiles: &'a TileSet,
        sink: &'a mut dyn NodeSink,
        mode: Mode<'a>,
    ) -> Self {
        let mut output_filter = SeparableFilter::new(opts.output_filter_scale_thresh);
        output_filter.set_output_sizes(opts.output_filter_voxels());
        Self {
            tiles,
            sink,
            mode,
            rule: LeafRule::new(opts),
            voxel_nm: opts.voxel_nm(),
            device_free_bytes: opts.device_free_bytes,
            pool: WorkspacePool::new(0),
            input_filter: SeparableFilter::new(opts.input_filter_scale_thresh),
            output_filter,
            input: Volume::new(Vec::new(), PixelType::default()),
            summary: BuildSummary::default(),
        }
    }

    fn with_pool(mut self, capacity: usize) -> Self {
        self.pool = WorkspacePool::new(capacity);
        self.summary.pool_capacity = capacity;
        self
    }

    fn is_leaf(&self, bbox: &BoundingBox) -> bool {
        self.rule.is_leaf(bbox)
    }

    fn release_quietly(&mut self, node: Node) {
        if let Err(e) = self.pool.release(node) {
            tracing::error!(error = %e, "pool release failed");
        }
    }

    fn emit(
        &mut self,
        node: Option<&Node>,
        path: &TreePath,
        bbox: &BoundingBox,
    ) -> PyramidResult<()> {
        let vol = node.map(|n| self.pool.volume(n));
        self.sink
            .accept(vol, path, bbox)
            .map_err(|e| PyramidError::aborted(format!("sink rejected node {path}: {e}")))?;
        self.summary.nodes += 1;
        Ok(())
    }

    /// Turn a local failure into "no node".
    fn absorb(
        &mut self,
        result: PyramidResult<Option<Node>>,
        path: &TreePath,
    ) -> PyramidResult<Option<Node>> {
        match result {
            Err(e) if e.is_subtree_local() => {
                tracing::warn!(address = %path, error = %e, "subtree dropped");
                self.summary.dropped_subtrees += 1;
                Ok(None)
            }
            other => other,
        }
    }

    fn visit(&mut self, bbox: &BoundingBox, path: &mut TreePath) -> PyramidResult<Option<Node>> {
        tracing::debug!(address = %path, bbox = %bbox, "visit");
        match self.mode {
            Mode::Render => self.render_child(bbox, path),
            Mode::Addresses { .. } => self.address_child(bbox, path),
            Mode::Target { .. } => self.target_child(bbox, path),
        }
    }

    fn render_child(
        &mut self,
        bbox: &BoundingBox,
        path: &mut TreePath,
    ) -> PyramidResult<Option<Node>> {
        let out = if self.is_leaf(bbox) {
            self.render_leaf(bbox, path)
        } else {
            self.render_node(bbox, path, Children::Descend)
        };
        let out = self.absorb(out, path)?;
        let emitted = match &out {
            Some(node) => self.emit(Some(node), path, bbox),
            None => Ok(()),
        };
        if let Err(e) = emitted {
            if let Some(node) = out {
                self.release_quietly(node);
            }
            return Err(e);
        }
        Ok(out)
    }

    fn render_leaf(&mut self, bbox: &BoundingBox, path: &TreePath) -> PyramidResult<Option<Node>> {
        let mut out = None;
        match self.fill_leaf(bbox, path, &mut out) {
            Ok(()) => Ok(out),
            Err(e) => {
                if let Some(node) = out {
                    self.release_quietly(node);
                }
                Err(e)
            }
        }
    }

    fn fill_leaf(
        &mut self,
        bbox: &BoundingBox,
        path: &TreePath,
        out: &mut Option<Node>,
    ) -> PyramidResult<()> {
        let tiles = self.tiles;
        let mut hits = 0usize;
        for tile in tiles.iter() {
            if !bbox.hit(tile.aabb()) {
                continue;
            }
            hits += 1;
            if self.input.shape() != tile.shape() {
                self.input.reshape(tile.shape());
            }
            if out.is_none() {
                self.pool.set_reference(tile.shape());
                *out = Some(self.pool.allocate(bbox, self.voxel_nm)?);
            }
            let Some(node) = out.as_mut() else {
                continue;
            };
            tile.read_into(&mut self.input)?;

            let plan = SlabPlan::new(tile.shape(), tile.transform(), self.device_free_bytes)?;
            if plan.is_split() {
                tracing::debug!(
                    address = %path,
                    slabs = plan.count(),
                    planes_per_slab = plan.dz(),
                    "tile split into slabs"
                );
            }
            for slab in plan.iter() {
                let owned;
                let src: &Volume = if plan.is_split() {
                    owned = self.input.slab(slab.z0, slab.nz)?;
                    &owned
                } else {
                    &self.input
                };
                let t = Transform::compose(bbox, self.voxel_nm, &slab.transform)?;
                self.input_filter.set_from_transform(&t);
                let src = if self.input_filter.any_enabled() {
                    self.input_filter.apply(src)?
                } else {
                    src
                };
                affine_resample(self.pool.volume_mut(node), src, &t)?;
            }
        }

        if let Some(node) = out.as_mut()
            && self.output_filter.any_enabled()
        {
            let filtered = self.output_filter.apply(self.pool.volume(node))?;
            self.pool.volume_mut(node).copy_from(filtered)?;
        }
        if hits > 0 {
            self.summary.leaves += 1;
            tracing::info!(address = %path, tiles = hits, "leaf rendered");
        }
        Ok(())
    }

    fn render_node(
        &mut self,
        bbox: &BoundingBox,
        path: &mut TreePath,
        source: Children,
    ) -> PyramidResult<Option<Node>> {
        let children = bbox.subdivide(self.rule.nchildren)?;
        let mut out: Option<Node> = None;
        for (i, cbox) in children.iter().enumerate() {
            let child = path.with_child(i as u32, |p| match source {
                Children::Descend => self.visit(cbox, p),
                Children::Load => self.load_child(p),
            });
            let child = match child {
                Ok(Some(c)) => c,
                Ok(None) => continue,
                Err(e) => {
                    if let Some(node) = out {
                        self.release_quietly(node);
                    }
                    return Err(e);
                }
            };
            if let Err(e) = self.composite_child(bbox, &mut out, child, cbox) {
                if let Some(node) = out {
                    self.release_quietly(node);
                }
                return Err(e);
            }
        }
        Ok(out)
    }

    /// Resample `child` into the parent node, allocating the parent on first use. `child` is
    /// always released.
    fn composite_child(
        &mut self,
        bbox: &BoundingBox,
        out: &mut Option<Node>,
        child: Node,
        cbox: &BoundingBox,
    ) -> PyramidResult<()> {
        let result = self.composite_into(bbox, out, &child, cbox);
        self.release_quietly(child);
        result
    }

    fn composite_into(
        &mut self,
        bbox: &BoundingBox,
        out: &mut Option<Node>,
        child: &Node,
        cbox: &BoundingBox,
    ) -> PyramidResult<()> {
        let cdims = self.pool.volume(child).dims().to_vec();
        if out.is_none() {
            // Split axes halve the resolution; the rest keep the child's.
            let mut res = [1.0f64; 3];
            for (k, r) in res.iter_mut().enumerate() {
                if k >= cdims.len().min(SPATIAL_AXES) || k >= cbox.ndim() {
                    continue;
                }
                let s = if k < self.rule.nsplit() { 2.0 } else { 1.0 };
                *r = s * cbox.shape()[k] as f64 / cdims[k] as f64;
            }
            *out = Some(self.pool.allocate(bbox, res)?);
        }
        let Some(node) = out.as_mut() else {
            return Ok(());
        };
        let pdims = self.pool.volume(node).dims().to_vec();
        let t = Transform::box_to_box(&pdims, bbox, &cdims, cbox)?;
        self.input_filter.set_from_transform(&t);
        if self.input_filter.any_enabled() {
            let src = self.input_filter.apply(self.pool.volume(child))?;
            affine_resample(self.pool.volume_mut(node), src, &t)?;
        } else {
            let (dst, src) = self.pool.pair_mut(node, child)?;
            affine_resample(dst, src, &t)?;
        }
        Ok(())
    }

    fn address_child(
        &mut self,
        bbox: &BoundingBox,
        path: &mut TreePath,
    ) -> PyramidResult<Option<Node>> {
        if let Mode::Addresses {
            prefix: Some(prefix),
        } = &self.mode
            && !path.starts_with(prefix)
            && !prefix.starts_with(path)
        {
            return Ok(None);
        }
        if !self.is_leaf(bbox) {
            self.render_node(bbox, path, Children::Descend)?;
        }
        let under_prefix = match &self.mode {
            Mode::Addresses {
                prefix: Some(prefix),
            } => path.starts_with(prefix),
            _ => true,
        };
        if under_prefix && self.tiles.any_hit(bbox) {
            self.emit(None, path, bbox)?;
        }
        Ok(None)
    }

    fn target_child(
        &mut self,
        bbox: &BoundingBox,
        path: &mut TreePath,
    ) -> PyramidResult<Option<Node>> {
        let (at_target, on_target_path) = match &self.mode {
            Mode::Target { target, .. } => (*path == *target, target.starts_with(path)),
            _ => return Ok(None),
        };
        if at_target {
            let out = if self.is_leaf(bbox) {
                self.render_leaf(bbox, path)
            } else {
                self.render_node(bbox, path, Children::Load)
            };
            let out = self.absorb(out, path)?;
            if let Some(node) = out {
                let emitted = self.emit(Some(&node), path, bbox);
                self.release_quietly(node);
                emitted?;
            }
            return Ok(None);
        }
        if on_target_path && !self.is_leaf(bbox) {
            self.render_node(bbox, path, Children::Descend)?;
        }
        Ok(None)
    }

    fn load_child(&mut self, path: &TreePath) -> PyramidResult<Option<Node>> {
        let Mode::Target { loader, .. } = &mut self.mode else {
            return Ok(None);
        };
        let loaded = loader.load(path);
        let loaded = self.absorb(loaded.map(|v| v.map(Node::Owned)), path)?;
        if let Some(Node::Owned(v)) = &loaded {
            self.pool.set_reference(v.shape());
            tracing::debug!(address = %path, dims = ?v.dims(), "loaded child");
        }
        Ok(loaded)
    }

    fn finish(self) -> BuildSummary {
        let mut summary = self.summary;
        summary.pool = self.pool.stats();
        tracing::info!(
            nodes = summary.nodes,
            leaves = summary.leaves,
            dropped = summary.dropped_subtrees,
            pool_capacity = summary.pool_capacity,
            pool_peak = summary.pool.peak_in_use,
            "build finished"
        );
        summary
    }
}

/// The box a build covers: `opts.ori`/`opts.size` applied to the union of the tile boxes.
pub fn output_box(opts: &RenderOpts, tiles: &TileSet) -> PyramidResult<BoundingBox> {
    opts.validate()?;
    if tiles.is_empty() {
        return Err(PyramidError::validation("no tiles to render"));
    }
    let bbox = tiles.select(opts.ori, opts.size)?;
    if bbox.volume() <= 0.0 {
        return Err(PyramidError::validation(format!("output box {bbox} is empty")));
    }
    if bbox.ndim() < opts.nchildren.trailing_zeros() as usize {
        return Err(PyramidError::validation(format!(
            "a {}-d box cannot be split {} ways",
            bbox.ndim(),
            opts.nchildren
        )));
    }
    Ok(bbox)
}

/// Levels from the root to the deepest leaf of the tree a build would visit.
pub fn tree_depth(opts: &RenderOpts, tiles: &TileSet) -> PyramidResult<usize> {
    LeafRule::new(opts).path_length(&output_box(opts, tiles)?)
}

/// Render the whole pyramid, handing every node to `sink` bottom-up.
#[tracing::instrument(skip_all, fields(tiles = tiles.len(), nchildren = opts.nchildren))]
pub fn render(
    opts: &RenderOpts,
    tiles: &TileSet,
    sink: &mut dyn NodeSink,
) -> PyramidResult<BuildSummary> {
    let bbox = output_box(opts, tiles)?;
    let depth = LeafRule::new(opts).path_length(&bbox)?;
    let mut engine = Engine::new(opts, tiles, sink, Mode::Render).with_pool(depth);
    let mut path = TreePath::root();
    if let Some(root) = engine.visit(&bbox, &mut path)? {
        engine.release_quietly(root);
    }
    Ok(engine.finish())
}

/// Emit the address of every node a full build would produce, in the same dependency order,
/// without reading any tile. With `prefix`, only addresses under it are emitted.
#[tracing::instrument(skip_all, fields(tiles = tiles.len(), nchildren = opts.nchildren))]
pub fn addresses(
    opts: &RenderOpts,
    tiles: &TileSet,
    sink: &mut dyn NodeSink,
    prefix: Option<&TreePath>,
) -> PyramidResult<BuildSummary> {
    let bbox = output_box(opts, tiles)?;
    let mode = Mode::Addresses {
        prefix: prefix.cloned(),
    };
    let mut engine = Engine::new(opts, tiles, sink, mode);
    let mut path = TreePath::root();
    engine.visit(&bbox, &mut path)?;
    Ok(engine.finish())
}

/// Rebuild the single node at `target`.
///
/// A leaf target is rendered from tiles. An internal target is composed from its children as
/// returned by `loader`; missing children contribute nothing. Ancestors are not rebuilt.
#[tracing::instrument(skip_all, fields(target = %target, nchildren = opts.nchildren))]
pub fn render_target(
    opts: &RenderOpts,
    tiles: &TileSet,
    sink: &mut dyn NodeSink,
    loader: &mut dyn NodeLoader,
    target: &TreePath,
) -> PyramidResult<BuildSummary> {
    let bbox = output_box(opts, tiles)?;
    if target.iter().any(|id| id as usize >= opts.nchildren) {
        return Err(PyramidError::validation(format!(
            "target {target} has a child index >= {}",
            opts.nchildren
        )));
    }
    let mode = Mode::Target {
        target: target.clone(),
        loader,
    };
    let mut engine = Engine::new(opts, tiles, sink, mode).with_pool(2);
    let mut path = TreePath::root();
    engine.visit(&bbox, &mut path)?;
    let summary = engine.finish();
    if summary.nodes == 0 {
        tracing::warn!(target = %target, "target produced no node");
    }
    Ok(summary)
}
