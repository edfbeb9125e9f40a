//! Per-message prefix-tree (Huffman) codec.
//!
//! A fresh [`PrefixTree`] is built from the symbol frequencies of each
//! plaintext, the text is encoded into a [`BitString`], and the tree travels
//! with the payload so the receiver can walk it back into text.
//!
//! Construction is deterministic: pending nodes are ordered by
//! `(weight, sequence)`, leaves are numbered in first-occurrence order and
//! internal nodes continue the count as they are created. The first node
//! popped becomes the left (`'0'`) child.

use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BinaryHeap, HashMap};

use serde::{Deserialize, Serialize};

use crate::bits::BitString;

/// Error type for codec operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// The text to encode was empty.
    #[error("input text cannot be empty")]
    EmptyInput,

    /// A symbol of the text has no entry in the code table.
    #[error("no code for symbol {0:?}")]
    MissingCode(char),

    /// The tree cannot be walked with the given bits.
    #[error("malformed tree at bit {position}: {reason}")]
    MalformedTree {
        /// Index of the bit being consumed when the problem was found.
        position: usize,
        /// What was wrong with the node reached.
        reason: &'static str,
    },

    /// The bit stream ended part-way through a code.
    #[error("bit stream of length {len} ends inside a code")]
    TruncatedCode {
        /// Total number of bits consumed.
        len: usize,
    },

    /// Tree (de)serialization failed.
    #[error("tree serialization error: {0}")]
    Serialization(String),
}

/// Mapping from symbol to its root-to-leaf path.
pub type CodeTable = BTreeMap<char, BitString>;

/// A node of the per-message prefix tree.
///
/// Leaves carry exactly one symbol and no children; internal nodes carry no
/// symbol, two children, and the sum of their children's weights. The serde
/// shape (`char`, `freq`, `left`, `right`, with `null` for absent values) is
/// the persisted form stored alongside each payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixTree {
    #[serde(rename = "char")]
    symbol: Option<char>,
    #[serde(rename = "freq")]
    weight: u64,
    left: Option<Box<PrefixTree>>,
    right: Option<Box<PrefixTree>>,
}

impl PrefixTree {
    const fn leaf(symbol: char, weight: u64) -> Self {
        Self {
            symbol: Some(symbol),
            weight,
            left: None,
            right: None,
        }
    }

    fn internal(left: Self, right: Self) -> Self {
        Self {
            symbol: None,
            weight: left.weight + right.weight,
            left: Some(Box::new(left)),
            right: Some(Box::new(right)),
        }
    }

    /// The symbol carried by this node, if it is a leaf.
    #[must_use]
    pub const fn symbol(&self) -> Option<char> {
        self.symbol
    }

    /// Occurrence count of the symbol, or the summed weight of the subtree.
    #[must_use]
    pub const fn weight(&self) -> u64 {
        self.weight
    }

    /// Left (`'0'`) child.
    #[must_use]
    pub fn left(&self) -> Option<&Self> {
        self.left.as_deref()
    }

    /// Right (`'1'`) child.
    #[must_use]
    pub fn right(&self) -> Option<&Self> {
        self.right.as_deref()
    }

    /// A node without children.
    #[must_use]
    pub const fn is_leaf(&self) -> bool {
        self.left.is_none() && self.right.is_none()
    }

    /// Number of leaves (distinct symbols) below this node.
    #[must_use]
    pub fn leaf_count(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            if node.is_leaf() {
                count += 1;
            }
            stack.extend(node.left());
            stack.extend(node.right());
        }
        count
    }

    /// Serializes the tree to its persisted JSON form.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Serialization`] if JSON encoding fails.
    pub fn to_json(&self) -> Result<String, CodecError> {
        serde_json::to_string(self).map_err(|e| CodecError::Serialization(e.to_string()))
    }

    /// Restores a tree from its persisted JSON form.
    ///
    /// Structural validity is not checked here; [`decode`] reports
    /// [`CodecError::MalformedTree`] if the walk runs into a bad node.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Serialization`] if the JSON does not describe a tree.
    pub fn from_json(json: &str) -> Result<Self, CodecError> {
        serde_json::from_str(json).map_err(|e| CodecError::Serialization(e.to_string()))
    }
}

/// A node waiting in the merge queue, ordered by `(weight, seq)` only.
struct Pending {
    weight: u64,
    seq: usize,
    node: PrefixTree,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.weight, self.seq).cmp(&(other.weight, other.seq))
    }
}

/// Builds the prefix tree for `text`.
///
/// # Errors
///
/// Returns [`CodecError::EmptyInput`] if `text` is empty.
pub fn build_tree(text: &str) -> Result<PrefixTree, CodecError> {
    let mut order = Vec::new();
    let mut counts: HashMap<char, u64> = HashMap::new();
    for symbol in text.chars() {
        *counts.entry(symbol).or_insert_with(|| {
            order.push(symbol);
            0
        }) += 1;
    }

    if let [only] = order.as_slice() {
        return Ok(PrefixTree::leaf(*only, counts.get(only).copied().unwrap_or_default()));
    }

    let mut heap: BinaryHeap<Reverse<Pending>> = order
        .iter()
        .enumerate()
        .map(|(seq, symbol)| {
            let weight = counts.get(symbol).copied().unwrap_or_default();
            Reverse(Pending {
                weight,
                seq,
                node: PrefixTree::leaf(*symbol, weight),
            })
        })
        .collect();

    let mut seq = heap.len();
    while heap.len() > 1 {
        let (Some(Reverse(left)), Some(Reverse(right))) = (heap.pop(), heap.pop()) else {
            break;
        };
        let node = PrefixTree::internal(left.node, right.node);
        heap.push(Reverse(Pending {
            weight: node.weight,
            seq,
            node,
        }));
        seq += 1;
    }

    heap.pop()
        .map(|Reverse(pending)| pending.node)
        .ok_or(CodecError::EmptyInput)
}

/// Derives the code table by pre-order traversal of `tree`.
///
/// A tree consisting of a single leaf assigns that symbol the code `"0"`.
#[must_use]
pub fn code_table(tree: &PrefixTree) -> CodeTable {
    let mut table = CodeTable::new();
    let mut stack = vec![(tree, BitString::new())];
    while let Some((node, prefix)) = stack.pop() {
        if let Some(right) = node.right() {
            let mut code = prefix.clone();
            code.push(true);
            stack.push((right, code));
        }
        if let Some(left) = node.left() {
            let mut code = prefix.clone();
            code.push(false);
            stack.push((left, code));
        }
        if let Some(symbol) = node.symbol {
            let code = if prefix.is_empty() {
                BitString::from_bits([false])
            } else {
                prefix
            };
            table.insert(symbol, code);
        }
    }
    table
}

/// Output of [`encode`]: the compressed bits and the tree needed to decode them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoded {
    /// Concatenated symbol codes.
    pub bits: BitString,
    /// Tree the codes were derived from.
    pub tree: PrefixTree,
}

/// Encodes `text` with a tree built from its own symbol frequencies.
///
/// # Errors
///
/// Returns [`CodecError::EmptyInput`] for empty text, or
/// [`CodecError::MissingCode`] if a symbol has no code.
pub fn encode(text: &str) -> Result<Encoded, CodecError> {
    let tree = build_tree(text)?;
    let table = code_table(&tree);

    let mut bits = BitString::new();
    for symbol in text.chars() {
        let code = table.get(&symbol).ok_or(CodecError::MissingCode(symbol))?;
        bits.push_code(code);
    }
    Ok(Encoded { bits, tree })
}

/// Walks `tree` with `bits`, emitting a symbol each time a leaf is reached.
///
/// # Errors
///
/// Returns [`CodecError::MalformedTree`] if a step has no child to follow or
/// reaches an inconsistent node, and [`CodecError::TruncatedCode`] if the
/// bits stop part-way down the tree.
pub fn decode(bits: &BitString, tree: &PrefixTree) -> Result<String, CodecError> {
    check_shape(tree, 0)?;
    if let Some(symbol) = tree.symbol {
        return bits
            .iter()
            .enumerate()
            .map(|(position, bit)| {
                if bit {
                    Err(CodecError::MalformedTree {
                        position,
                        reason: "single-symbol tree has no right branch",
                    })
                } else {
                    Ok(symbol)
                }
            })
            .collect();
    }

    let mut text = String::new();
    let mut node = tree;
    let mut mid_code = false;
    for (position, bit) in bits.iter().enumerate() {
        let next = if bit { node.right() } else { node.left() };
        node = next.ok_or(CodecError::MalformedTree {
            position,
            reason: "no child for bit",
        })?;
        check_shape(node, position)?;
        if let Some(symbol) = node.symbol {
            text.push(symbol);
            node = tree;
            mid_code = false;
        } else {
            mid_code = true;
        }
    }

    if mid_code {
        return Err(CodecError::TruncatedCode { len: bits.len() });
    }
    Ok(text)
}

/// A node is either a leaf with a symbol and no children, or an internal
/// node with two children and no symbol.
fn check_shape(node: &PrefixTree, position: usize) -> Result<(), CodecError> {
    let reason = match (node.symbol, node.left.is_some(), node.right.is_some()) {
        (Some(_), false, false) | (None, true, true) => return Ok(()),
        (Some(_), _, _) => "node has both a symbol and children",
        (None, false, false) => "leaf without a symbol",
        (None, _, _) => "internal node with a single child",
    };
    Err(CodecError::MalformedTree { position, reason })
}
