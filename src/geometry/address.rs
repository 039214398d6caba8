//! Addresses of nodes in the subdivision tree.

use crate::foundation::error::{PyramidError, PyramidResult};

/// Path from the root of the tree to a node, as a sequence of child indices.
///
/// The root is the empty path. The path is used as a stack during traversal: callers push the
/// child index on entry and pop it on exit. [`TreePath::with_child`] pairs the two.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TreePath {
    ids: Vec<u32>,
}

impl TreePath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn from_ids(ids: impl Into<Vec<u32>>) -> Self {
        Self { ids: ids.into() }
    }

    pub fn ids(&self) -> &[u32] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.ids.iter().copied()
    }

    pub fn push(&mut self, id: u32) {
        self.ids.push(id);
    }

    pub fn pop(&mut self) -> Option<u32> {
        self.ids.pop()
    }

    /// Run `f` with `id` pushed onto the path. The path is restored before returning, whatever
    /// `f` returns.
    pub fn with_child<R>(&mut self, id: u32, f: impl FnOnce(&mut Self) -> R) -> R {
        let depth = self.ids.len();
        self.ids.push(id);
        let out = f(self);
        self.ids.truncate(depth);
        out
    }

    /// `true` when `prefix` names this node or one of its ancestors.
    pub fn starts_with(&self, prefix: &TreePath) -> bool {
        self.ids.starts_with(&prefix.ids)
    }

    /// Encode as an integer, root digit most significant.
    ///
    /// Each digit is stored as `id + 1` so leading zero indices survive. `base` must exceed every
    /// `id + 1`; decoding needs the digit count ([`TreePath::len`]).
    pub fn to_int(&self, base: u64) -> PyramidResult<u64> {
        if base < 2 {
            return Err(PyramidError::validation("address base must be >= 2"));
        }
        let mut v = 0u64;
        for &id in &self.ids {
            let digit = u64::from(id) + 1;
            if digit >= base {
                return Err(PyramidError::validation(format!(
                    "child index {id} does not fit in base {base}"
                )));
            }
            v = v
                .checked_mul(base)
                .and_then(|v| v.checked_add(digit))
                .ok_or_else(|| PyramidError::validation("address does not fit in 64 bits"))?;
        }
        Ok(v)
    }

    /// Inverse of [`TreePath::to_int`].
    pub fn from_int(mut v: u64, ndigits: usize, base: u64) -> PyramidResult<Self> {
        if base < 2 {
            return Err(PyramidError::validation("address base must be >= 2"));
        }
        let mut ids = vec![0u32; ndigits];
        for slot in ids.iter_mut().rev() {
            let digit = v % base;
            if digit == 0 {
                return Err(PyramidError::validation(
                    "address digit 0 is not a valid encoded child index",
                ));
            }
            *slot = (digit - 1) as u32;
            v /= base;
        }
        if v != 0 {
            return Err(PyramidError::validation(format!(
                "address has more than {ndigits} digits"
            )));
        }
        Ok(Self { ids })
    }

    /// Slash-joined child indices, e.g. `"1/2/0"`. The root renders as `""`.
    ///
    /// Used verbatim as a relative directory when persisting nodes.
    pub fn to_path_string(&self) -> String {
        self.ids
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Parse the output of [`TreePath::to_path_string`].
    pub fn parse_path_string(s: &str) -> PyramidResult<Self> {
        let s = s.trim().trim_matches('/');
        if s.is_empty() {
            return Ok(Self::root());
        }
        let ids = s
            .split('/')
            .map(|part| {
                part.parse::<u32>()
                    .map_err(|_| PyramidError::validation(format!("invalid address part '{part}'")))
            })
            .collect::<PyramidResult<Vec<_>>>()?;
        Ok(Self { ids })
    }

    /// Parse one child index per decimal digit, e.g. `"310"` is `3/1/0`.
    ///
    /// The digit count is the length of the string, so `"0"` and `"00"` are different nodes.
    pub fn parse_digits(s: &str) -> PyramidResult<Self> {
        let s = s.trim();
        let ids = s
            .chars()
            .map(|c| {
                c.to_digit(10)
                    .ok_or_else(|| PyramidError::validation(format!("invalid address digit '{c}'")))
            })
            .collect::<PyramidResult<Vec<_>>>()?;
        Ok(Self { ids })
    }

    /// Narrow a fractional box (`ori`, `size` as fractions of some domain) to the sub-box this
    /// path addresses when every level splits the first `log2(n_children)` axes in half.
    pub fn fraction_of(
        &self,
        mut ori: [f64; 3],
        mut size: [f64; 3],
        n_children: usize,
    ) -> ([f64; 3], [f64; 3]) {
        let nsplit = (n_children.max(1).trailing_zeros() as usize).min(3);
        for &id in &self.ids {
            for k in 0..nsplit {
                size[k] /= 2.0;
                if (id >> k) & 1 == 1 {
                    ori[k] += size[k];
                }
            }
        }
        (ori, size)
    }
}

impl std::fmt::Display for TreePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.ids.is_empty() {
            return f.write_str("/");
        }
        f.write_str(&self.to_path_string())
    }
}
