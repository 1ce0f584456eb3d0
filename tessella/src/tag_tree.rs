//! The tag tree, described in Section B.10.2.
//!
//! Tag trees are quad trees where each leaf stores an integer value.
//! Each intermediate node stores the smallest value of all of its children,
//! so the root holds the minimum over the whole grid. Coding walks the tree
//! from the root to a leaf and transmits, per node, "is the value still
//! larger than the current threshold?" bits until the node resolves.
//!
//! Nodes live in a flat array, leaves first, with the parent index
//! precomputed per node. Both the reading side (packet-header parsing) and
//! the writing side (packet-header generation) share the same state
//! machine: `current_value` climbs monotonically, `resolved` latches once
//! the node's value has been fully communicated.

use crate::bit_reader::StuffedBits;
use crate::bit_writer::BitWriter;
use crate::log::lwarn;

#[derive(Debug, Clone, Copy, Default)]
struct TagNode {
    /// The value assigned (writer) or decoded so far (reader).
    value: u32,
    /// The threshold the node has been tested against so far.
    current_value: u32,
    /// Whether the value is fully communicated.
    resolved: bool,
    /// Index of the parent node, or `u32::MAX` for the root.
    parent: u32,
}

const NO_PARENT: u32 = u32::MAX;

/// A tag tree over an `width x height` grid of leaves.
#[derive(Debug, Clone)]
pub(crate) struct TagTree {
    width: u32,
    height: u32,
    nodes: Vec<TagNode>,
    /// `(width, height, offset into nodes)` per level, leaves first.
    levels: Vec<(u32, u32, u32)>,
}

impl TagTree {
    pub(crate) fn new(width: u32, height: u32) -> Self {
        let mut levels = Vec::new();
        let mut nodes_len = 0u32;

        let (mut w, mut h) = (width.max(1), height.max(1));
        loop {
            levels.push((w, h, nodes_len));
            nodes_len += w * h;

            if w == 1 && h == 1 {
                break;
            }

            w = w.div_ceil(2);
            h = h.div_ceil(2);
        }

        let mut nodes = vec![TagNode::default(); nodes_len as usize];

        // Precompute parent links: the parent of (x, y) on level l is
        // (x / 2, y / 2) on level l + 1.
        for level in 0..levels.len() - 1 {
            let (w, _, offset) = levels[level];
            let (parent_w, _, parent_offset) = levels[level + 1];
            let (_, h, _) = levels[level];

            for y in 0..h {
                for x in 0..w {
                    let idx = offset + y * w + x;
                    nodes[idx as usize].parent = parent_offset + (y / 2) * parent_w + (x / 2);
                }
            }
        }

        let root = nodes_len - 1;
        nodes[root as usize].parent = NO_PARENT;

        Self {
            width,
            height,
            nodes,
            levels,
        }
    }

    /// The path from the root down to leaf (x, y).
    fn path_to(&self, x: u32, y: u32) -> Vec<u32> {
        let (leaf_w, _, _) = self.levels[0];
        let mut idx = y * leaf_w + x;

        let mut path = Vec::with_capacity(self.levels.len());
        loop {
            path.push(idx);
            let parent = self.nodes[idx as usize].parent;
            if parent == NO_PARENT {
                break;
            }
            idx = parent;
        }

        path.reverse();
        path
    }

    /// Assign a leaf value. Only meaningful on the writing side; call
    /// [`TagTree::build`] once all leaves are set.
    pub(crate) fn set_value(&mut self, x: u32, y: u32, value: u32) {
        debug_assert!(x < self.width && y < self.height);
        let (leaf_w, _, _) = self.levels[0];
        self.nodes[(y * leaf_w + x) as usize].value = value;
    }

    /// Fill every interior node with the minimum of its children.
    pub(crate) fn build(&mut self) {
        for level in 1..self.levels.len() {
            let (w, h, offset) = self.levels[level];
            let (child_w, child_h, child_offset) = self.levels[level - 1];

            for y in 0..h {
                for x in 0..w {
                    let mut min = u32::MAX;

                    for cy in (2 * y)..u32::min(2 * y + 2, child_h) {
                        for cx in (2 * x)..u32::min(2 * x + 2, child_w) {
                            let child = self.nodes[(child_offset + cy * child_w + cx) as usize];
                            min = u32::min(min, child.value);
                        }
                    }

                    self.nodes[(offset + y * w + x) as usize].value = min;
                }
            }
        }
    }

    /// Decode the value of leaf (x, y), reading only as many bits as are
    /// needed to determine whether the value is below `max_val`. The return
    /// value equals `max_val` when the leaf is only known to be at least
    /// that large.
    pub(crate) fn read(
        &mut self,
        x: u32,
        y: u32,
        reader: &mut StuffedBits<'_>,
        max_val: u32,
    ) -> Option<u32> {
        if x >= self.width || y >= self.height {
            lwarn!(
                "attempted to read invalid index x: {}, y: {} in tag tree with dimensions {}x{}",
                x,
                y,
                self.width,
                self.height
            );

            return None;
        }

        let mut inherited = 0;
        let mut value = 0;

        for idx in self.path_to(x, y) {
            let node = &mut self.nodes[idx as usize];

            if node.current_value < inherited {
                node.current_value = inherited;
            }

            if !node.resolved {
                // "Each node has an associated current value, which is
                // initialized to zero (the minimum). A 0 bit in the tag tree
                // means that the minimum (or the value in the case of the
                // highest level) is larger than the current value and a 1 bit
                // means that the minimum (or the value ...) is equal to the
                // current value."
                while node.current_value < max_val {
                    match reader.bit()? {
                        0 => node.current_value += 1,
                        _ => {
                            node.value = node.current_value;
                            node.resolved = true;
                            break;
                        }
                    }
                }
            }

            inherited = node.current_value;
            value = node.current_value;

            // The node is only known to be >= max_val; nothing below it can
            // be determined in this packet.
            if !node.resolved {
                break;
            }
        }

        Some(value)
    }

    /// Encode leaf (x, y) against `max_val`, the writer-side mirror of
    /// [`TagTree::read`]: emits exactly the bits the reader will consume.
    pub(crate) fn write(&mut self, x: u32, y: u32, writer: &mut BitWriter, max_val: u32) {
        debug_assert!(x < self.width && y < self.height);

        let mut inherited = 0;

        for idx in self.path_to(x, y) {
            let node = &mut self.nodes[idx as usize];

            if node.current_value < inherited {
                node.current_value = inherited;
            }

            if !node.resolved {
                while node.current_value < max_val {
                    if node.value == node.current_value {
                        writer.put_bit(1);
                        node.resolved = true;
                        break;
                    }

                    writer.put_bit(0);
                    node.current_value += 1;
                }
            }

            inherited = node.current_value;

            if !node.resolved {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bits_to_bytes(bits: &[u8]) -> Vec<u8> {
        let mut bytes = vec![0u8; bits.len().div_ceil(8)];
        for (i, bit) in bits.iter().enumerate() {
            bytes[i / 8] |= bit << (7 - (i % 8));
        }
        bytes
    }

    /// The example from B.10.2, in its extended form as shown in the
    /// "JPEG2000 Standard for Image compression" book.
    #[test]
    fn tag_tree_1() {
        let mut tree = TagTree::new(6, 3);

        let bytes = bits_to_bytes(&[
            0, 1, 1, 1, 1, // q3(0, 0)
            0, 0, 1, // q3(1, 0)
            1, 0, 1, // q3(2, 0)
            0, 0, 1, // q3(3, 0)
            1, 0, 1, 1, // q3(4, 0)
        ]);

        let mut reader = StuffedBits::over(&bytes);

        assert_eq!(tree.read(0, 0, &mut reader, u32::MAX).unwrap(), 1);
        assert_eq!(tree.read(1, 0, &mut reader, u32::MAX).unwrap(), 3);
        assert_eq!(tree.read(2, 0, &mut reader, u32::MAX).unwrap(), 2);
        assert_eq!(tree.read(3, 0, &mut reader, u32::MAX).unwrap(), 3);
        assert_eq!(tree.read(4, 0, &mut reader, u32::MAX).unwrap(), 2);
    }

    /// Inclusion tag tree from Table B.5.
    #[test]
    fn tag_tree_2() {
        let mut tree = TagTree::new(3, 2);

        let bytes = bits_to_bytes(&[
            1, 1, 1, // Code-block 0, 0 included for the first time
            // (partial inclusion tag tree)
            1, // Code-block 1, 0 included for the first time
            0, // Code-block 2, 0 not yet included (partial tag tree)
            0, // Code-block 0, 1 not yet included
            0, // Code-block 1, 1 not yet included
               // Code-block 2, 1 not yet included (no data needed, already
               // conveyed by the partial tag tree for code-block 2, 0)
        ]);

        let mut reader = StuffedBits::over(&bytes);

        let next_layer = 1;

        assert_eq!(tree.read(0, 0, &mut reader, next_layer).unwrap(), 0);
        assert_eq!(tree.read(1, 0, &mut reader, next_layer).unwrap(), 0);
        assert_eq!(tree.read(2, 0, &mut reader, next_layer).unwrap(), 1);
        assert_eq!(tree.read(0, 1, &mut reader, next_layer).unwrap(), 1);
        assert_eq!(tree.read(1, 1, &mut reader, next_layer).unwrap(), 1);
        assert_eq!(tree.read(2, 1, &mut reader, next_layer).unwrap(), 1);
    }

    /// Whatever the writer emits, the reader must get the values back,
    /// layer by layer, with the state machines staying in lockstep.
    #[test]
    fn write_read_round_trip() {
        let values = [
            [0u32, 3, 2, 3], //
            [1, 1, 2, 0],
            [2, 2, 1, 1],
            [3, 0, 0, 2],
        ];

        let mut enc_tree = TagTree::new(4, 4);
        for (y, row) in values.iter().enumerate() {
            for (x, v) in row.iter().enumerate() {
                enc_tree.set_value(x as u32, y as u32, *v);
            }
        }
        enc_tree.build();

        let mut writer = BitWriter::new();
        for threshold in 1..=4u32 {
            for y in 0..4 {
                for x in 0..4 {
                    enc_tree.write(x, y, &mut writer, threshold);
                }
            }
        }

        let bytes = writer.finish();
        let mut dec_tree = TagTree::new(4, 4);
        let mut reader = StuffedBits::over(&bytes);

        let mut decoded = [[u32::MAX; 4]; 4];
        for threshold in 1..=4u32 {
            for y in 0..4 {
                for x in 0..4 {
                    let v = dec_tree.read(x, y, &mut reader, threshold).unwrap();
                    if v < threshold && decoded[y as usize][x as usize] == u32::MAX {
                        decoded[y as usize][x as usize] = v;
                    }
                }
            }
        }

        for y in 0..4 {
            for x in 0..4 {
                assert_eq!(decoded[y][x], values[y][x]);
            }
        }
    }

    /// Unbounded coding, as used for zero-bitplane information: a single
    /// visit resolves the leaf completely.
    #[test]
    fn unbounded_round_trip() {
        let values = [[1u32, 0, 2], [4, 1, 1]];

        let mut enc_tree = TagTree::new(3, 2);
        for (y, row) in values.iter().enumerate() {
            for (x, v) in row.iter().enumerate() {
                enc_tree.set_value(x as u32, y as u32, *v);
            }
        }
        enc_tree.build();

        let mut writer = BitWriter::new();
        for y in 0..2 {
            for x in 0..3 {
                enc_tree.write(x, y, &mut writer, u32::MAX);
            }
        }

        let bytes = writer.finish();
        let mut dec_tree = TagTree::new(3, 2);
        let mut reader = StuffedBits::over(&bytes);

        for (y, row) in values.iter().enumerate() {
            for (x, v) in row.iter().enumerate() {
                assert_eq!(
                    dec_tree
                        .read(x as u32, y as u32, &mut reader, u32::MAX)
                        .unwrap(),
                    *v
                );
            }
        }
    }

    /// Threshold coding over the (i + j) % 4 grid: exactly the leaves with
    /// a value below the bound resolve, and re-coding at the same bound
    /// emits nothing new.
    #[test]
    fn threshold_marks_expected_leaves() {
        let mut tree = TagTree::new(4, 4);
        for y in 0..4u32 {
            for x in 0..4u32 {
                tree.set_value(x, y, (x + y) % 4);
            }
        }
        tree.build();

        let mut writer = BitWriter::new();
        for y in 0..4 {
            for x in 0..4 {
                tree.write(x, y, &mut writer, 3);
            }
        }

        let resolved = (0..16)
            .filter(|i| tree.nodes[*i as usize].resolved)
            .count();
        // Twelve of the sixteen leaves hold a value of at most 2.
        assert_eq!(resolved, 12);

        assert!(!writer.finish().is_empty());

        let mut again = BitWriter::new();
        for y in 0..4 {
            for x in 0..4 {
                tree.write(x, y, &mut again, 3);
            }
        }
        assert!(again.finish().is_empty());
    }
}
