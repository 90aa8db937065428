//! PC-label registry: a growable array of
//! `{ pc_label, pc_offset, node_type, source_line, source_column, node_data }`
//! entries, appended during emission and resolved to final PC offsets before
//! the code buffer's label→offset query becomes invalid.
//!
//! `dynasmrt::Assembler::finalize()` performs link and encode in the same
//! call, so there is no separate "resolved but not yet encoded" window a
//! more conventional assembler API might expose. This implementation
//! resolves every entry's offset *at emission time* instead (`ops.offset()`
//! is always the label's final position once emitted, because `dynasmrt`
//! never moves already-written bytes) — strictly earlier than `finalize()`,
//! so every offset is resolved before the assembler's internal state is
//! consumed.

use dynasmrt::AssemblyOffset;

/// One profiler/debug-dump entry: where a node's code starts, and enough
/// about the node to report on it without walking the AST again.
#[derive(Debug, Clone)]
pub struct DebugEntry {
    pub pc_offset: usize,
    pub node_type: &'static str,
    pub line: u32,
    pub column: u32,
    /// A short human-readable rendering of the node's payload, e.g.
    /// `"ADD(+3, off=0)"`, used by `--debug` dumps and folded-stack labels.
    pub node_data: String,
}

/// Sorted-by-offset registry of `DebugEntry`s, built during emission.
#[derive(Debug, Default)]
pub struct DebugMap {
    entries: Vec<DebugEntry>,
}

impl DebugMap {
    pub fn new() -> Self {
        DebugMap::default()
    }

    /// Record a debug label at `offset`, tagged with enough about the
    /// originating node to report on later without re-walking the AST.
    pub fn push(&mut self, offset: AssemblyOffset, node_type: &'static str, line: u32, column: u32, node_data: String) {
        self.entries.push(DebugEntry {
            pc_offset: offset.0,
            node_type,
            line,
            column,
            node_data,
        });
    }

    /// Entries are appended in emission order, which is already offset-
    /// ascending (depth-first, left-to-right, and `dynasmrt` only appends).
    /// Re-sort defensively so `lookup`'s binary search holds even if a
    /// future emitter change violates that assumption.
    pub fn finalize(&mut self) {
        self.entries.sort_by_key(|e| e.pc_offset);
    }

    /// Find the entry whose `pc_offset` is the greatest one `<= pc_offset`,
    /// via binary search over the offset-sorted entries.
    pub fn nearest_preceding(&self, pc_offset: usize) -> Option<&DebugEntry> {
        match self.entries.binary_search_by_key(&pc_offset, |e| e.pc_offset) {
            Ok(idx) => Some(&self.entries[idx]),
            Err(0) => None,
            Err(idx) => Some(&self.entries[idx - 1]),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DebugEntry> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nearest_preceding_finds_the_last_entry_at_or_before_pc() {
        let mut map = DebugMap::new();
        map.push(AssemblyOffset(0), "ADD", 1, 1, "ADD(+1, off=0)".into());
        map.push(AssemblyOffset(10), "OUTPUT", 1, 2, "OUTPUT(off=0)".into());
        map.push(AssemblyOffset(20), "LOOP", 2, 1, "LOOP".into());
        map.finalize();

        assert_eq!(map.nearest_preceding(5).unwrap().node_type, "ADD");
        assert_eq!(map.nearest_preceding(10).unwrap().node_type, "OUTPUT");
        assert_eq!(map.nearest_preceding(19).unwrap().node_type, "OUTPUT");
        assert_eq!(map.nearest_preceding(25).unwrap().node_type, "LOOP");
    }

    #[test]
    fn empty_map_has_no_entry_before_any_pc() {
        let map = DebugMap::new();
        assert!(map.nearest_preceding(0).is_none());
    }
}
