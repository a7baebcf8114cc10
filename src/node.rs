//! Node encodings for the adaptive radix tree.
//!
//! A [`Node`] is either an immutable [`Leaf`] holding a full key and its
//! value, or an [`Inner`] node. Inner nodes carry an optimistic lock, a
//! compressed prefix, a terminal slot for the key that ends exactly at the
//! node, and one of four bodies sized by fan-out:
//!
//! | kind    | children | lookup                          |
//! |---------|----------|---------------------------------|
//! | Node4   | 4        | sorted key bytes, linear scan   |
//! | Node16  | 16       | sorted key bytes, linear scan   |
//! | Node48  | 48       | 256-entry byte index into slots |
//! | Node256 | 256      | direct by byte                  |
//!
//! The body kind of an inner node never changes in place. Growing or
//! shrinking allocates a replacement via [`Inner::rebuild`] and the old node
//! is unlocked obsolete and retired.
//!
//! # Concurrency
//!
//! Every field of an inner node is an atomic so optimistic readers can load
//! it while a writer holds the lock. A reader must validate the node's
//! version before trusting anything it loaded. Mutators (`insert_child`,
//! `replace`, `erase`, `set_prefix`) require the caller to hold the node's
//! write lock, or to own a node that has not been published yet.

use std::array as StdArray;
use std::fmt as StdFmt;
use std::ptr as StdPtr;
use std::sync::Arc;
use std::sync::atomic::{AtomicPtr, AtomicU8, AtomicU16, AtomicU32};

use crate::lock::{OptLock, Restart};
use crate::ordering::{READ_ORD, RELAXED, WRITE_ORD};

/// Bytes of prefix stored inline in an inner node. Longer prefixes keep
/// their full length and are recovered from the subtree's smallest leaf.
pub const MAX_PREFIX_LEN: usize = 10;

// ============================================================================
//  NodeKind
// ============================================================================

/// Body encoding of an inner node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeKind {
    /// Up to 4 children, sorted key bytes.
    Node4,
    /// Up to 16 children, sorted key bytes.
    Node16,
    /// Up to 48 children behind a 256-entry byte index.
    Node48,
    /// Up to 256 children indexed directly by byte.
    Node256,
}

impl NodeKind {
    /// Maximum number of children this kind holds.
    #[must_use]
    pub const fn capacity(self) -> usize {
        match self {
            Self::Node4 => 4,
            Self::Node16 => 16,
            Self::Node48 => 48,
            Self::Node256 => 256,
        }
    }

    /// The next larger kind. `Node256` never grows.
    #[must_use]
    pub const fn grown(self) -> Self {
        match self {
            Self::Node4 => Self::Node16,
            Self::Node16 => Self::Node48,
            Self::Node48 | Self::Node256 => Self::Node256,
        }
    }

    /// The next smaller kind. `Node4` never shrinks (it collapses instead).
    #[must_use]
    pub const fn shrunk(self) -> Self {
        match self {
            Self::Node4 | Self::Node16 => Self::Node4,
            Self::Node48 => Self::Node16,
            Self::Node256 => Self::Node48,
        }
    }

    /// Whether a node of this kind holding `count` children should be
    /// rebuilt as the next smaller kind.
    #[must_use]
    pub const fn should_shrink(self, count: usize) -> bool {
        match self {
            Self::Node4 => false,
            _ => count <= self.shrunk().capacity(),
        }
    }
}

// ============================================================================
//  Edge
// ============================================================================

/// Where a child hangs off an inner node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Edge {
    /// The leaf whose key ends exactly at this node.
    Terminal,
    /// The child selected by the next key byte.
    Byte(u8),
}

impl Edge {
    /// Edge followed by `key` at a node whose prefix ends at `depth`.
    #[inline]
    pub(crate) fn for_key(key: &[u8], depth: usize) -> Self {
        key.get(depth).map_or(Self::Terminal, |&b| Self::Byte(b))
    }

    /// Position of this edge in key order: the terminal sorts first, then
    /// child `b` at `b + 1`.
    #[inline]
    pub(crate) fn position(self) -> i32 {
        match self {
            Self::Terminal => 0,
            Self::Byte(b) => i32::from(b) + 1,
        }
    }

    /// Inverse of [`Edge::position`].
    #[inline]
    pub(crate) fn from_position(pos: i32) -> Self {
        u8::try_from(pos - 1).map_or(Self::Terminal, Self::Byte)
    }
}

// ============================================================================
//  Leaf
// ============================================================================

/// Immutable leaf: full key plus value. Updates swap in a new leaf.
pub(crate) struct Leaf<V> {
    key: Box<[u8]>,
    value: Arc<V>,
}

impl<V> Leaf<V> {
    #[inline]
    pub(crate) fn key(&self) -> &[u8] {
        &self.key
    }

    #[inline]
    pub(crate) const fn value(&self) -> &Arc<V> {
        &self.value
    }
}

// ============================================================================
//  Node
// ============================================================================

/// A tree node. Children are stored as `*mut Node<V>` from `Box::into_raw`.
pub(crate) enum Node<V> {
    Leaf(Leaf<V>),
    Inner(Inner<V>),
}

impl<V> Node<V> {
    /// Allocate a leaf node.
    pub(crate) fn new_leaf(key: &[u8], value: Arc<V>) -> *mut Self {
        Box::into_raw(Box::new(Self::Leaf(Leaf {
            key: key.into(),
            value,
        })))
    }

    /// Box an inner node for publication.
    pub(crate) fn boxed_inner(inner: Inner<V>) -> *mut Self {
        Box::into_raw(Box::new(Self::Inner(inner)))
    }
}

// ============================================================================
//  Bodies
// ============================================================================

/// Sorted key bytes with parallel child slots (Node4 / Node16).
struct Flat<V, const N: usize> {
    count: AtomicU8,
    keys: [AtomicU8; N],
    children: [AtomicPtr<Node<V>>; N],
}

impl<V, const N: usize> Flat<V, N> {
    fn new() -> Self {
        Self {
            count: AtomicU8::new(0),
            keys: StdArray::from_fn(|_| AtomicU8::new(0)),
            children: StdArray::from_fn(|_| AtomicPtr::new(StdPtr::null_mut())),
        }
    }

    /// Count clamped to capacity so a torn read never indexes out of bounds.
    #[inline]
    fn len(&self) -> usize {
        (self.count.load(READ_ORD) as usize).min(N)
    }

    #[inline]
    fn slot_of(&self, byte: u8) -> Option<usize> {
        (0..self.len()).find(|&i| self.keys[i].load(READ_ORD) == byte)
    }

    fn child(&self, byte: u8) -> *mut Node<V> {
        self.slot_of(byte)
            .map_or(StdPtr::null_mut(), |i| self.children[i].load(READ_ORD))
    }

    /// Child slot `i` if its byte passes `accept` and it is non-null.
    /// A shift in progress can expose a null slot; it is skipped.
    #[inline]
    fn probe(&self, i: usize, accept: impl Fn(u8) -> bool) -> Option<(u8, *mut Node<V>)> {
        let key = self.keys[i].load(READ_ORD);
        if !accept(key) {
            return None;
        }
        let child = self.children[i].load(READ_ORD);
        (!child.is_null()).then_some((key, child))
    }

    fn child_from(&self, from: u8) -> Option<(u8, *mut Node<V>)> {
        (0..self.len()).find_map(|i| self.probe(i, |key| key >= from))
    }

    fn child_upto(&self, upto: u8) -> Option<(u8, *mut Node<V>)> {
        (0..self.len()).rev().find_map(|i| self.probe(i, |key| key <= upto))
    }

    fn insert(&self, byte: u8, child: *mut Node<V>) {
        let len = self.len();
        debug_assert!(len < N, "insert into full flat body");
        let at = (0..len)
            .find(|&i| self.keys[i].load(RELAXED) > byte)
            .unwrap_or(len);
        for i in (at..len).rev() {
            self.keys[i + 1].store(self.keys[i].load(RELAXED), WRITE_ORD);
            self.children[i + 1].store(self.children[i].load(RELAXED), WRITE_ORD);
        }
        self.keys[at].store(byte, WRITE_ORD);
        self.children[at].store(child, WRITE_ORD);
        #[expect(clippy::cast_possible_truncation, reason = "N <= 16")]
        self.count.store((len + 1) as u8, WRITE_ORD);
    }

    fn replace(&self, byte: u8, child: *mut Node<V>) -> *mut Node<V> {
        self.slot_of(byte)
            .map_or(StdPtr::null_mut(), |i| self.children[i].swap(child, WRITE_ORD))
    }

    fn erase(&self, byte: u8) -> *mut Node<V> {
        let Some(at) = self.slot_of(byte) else {
            return StdPtr::null_mut();
        };
        let len = self.len();
        let old = self.children[at].load(RELAXED);
        for i in at..len - 1 {
            self.keys[i].store(self.keys[i + 1].load(RELAXED), WRITE_ORD);
            self.children[i].store(self.children[i + 1].load(RELAXED), WRITE_ORD);
        }
        self.children[len - 1].store(StdPtr::null_mut(), WRITE_ORD);
        #[expect(clippy::cast_possible_truncation, reason = "N <= 16")]
        self.count.store((len - 1) as u8, WRITE_ORD);
        old
    }
}

/// 256-entry byte index into 48 child slots. Index value 0 means empty,
/// otherwise it is `slot + 1`.
struct Indexed<V> {
    count: AtomicU8,
    index: [AtomicU8; 256],
    children: [AtomicPtr<Node<V>>; 48],
}

impl<V> Indexed<V> {
    fn new() -> Self {
        Self {
            count: AtomicU8::new(0),
            index: StdArray::from_fn(|_| AtomicU8::new(0)),
            children: StdArray::from_fn(|_| AtomicPtr::new(StdPtr::null_mut())),
        }
    }

    #[inline]
    fn len(&self) -> usize {
        self.count.load(READ_ORD) as usize
    }

    #[inline]
    fn child_at(&self, byte: u8) -> *mut Node<V> {
        match self.index[byte as usize].load(READ_ORD) as usize {
            0 => StdPtr::null_mut(),
            slot => self
                .children
                .get(slot - 1)
                .map_or(StdPtr::null_mut(), |c| c.load(READ_ORD)),
        }
    }

    fn child_from(&self, from: u8) -> Option<(u8, *mut Node<V>)> {
        (from..=u8::MAX).find_map(|b| {
            let child = self.child_at(b);
            (!child.is_null()).then_some((b, child))
        })
    }

    fn child_upto(&self, upto: u8) -> Option<(u8, *mut Node<V>)> {
        (0..=upto).rev().find_map(|b| {
            let child = self.child_at(b);
            (!child.is_null()).then_some((b, child))
        })
    }

    fn insert(&self, byte: u8, child: *mut Node<V>) {
        let Some(slot) = self.children.iter().position(|c| c.load(RELAXED).is_null()) else {
            unreachable!("insert into full Node48");
        };
        self.children[slot].store(child, WRITE_ORD);
        #[expect(clippy::cast_possible_truncation, reason = "slot < 48")]
        self.index[byte as usize].store(slot as u8 + 1, WRITE_ORD);
        self.count.store(self.count.load(RELAXED) + 1, WRITE_ORD);
    }

    fn replace(&self, byte: u8, child: *mut Node<V>) -> *mut Node<V> {
        match self.index[byte as usize].load(RELAXED) as usize {
            0 => StdPtr::null_mut(),
            slot => self.children[slot - 1].swap(child, WRITE_ORD),
        }
    }

    fn erase(&self, byte: u8) -> *mut Node<V> {
        match self.index[byte as usize].load(RELAXED) as usize {
            0 => StdPtr::null_mut(),
            slot => {
                self.index[byte as usize].store(0, WRITE_ORD);
                self.count.store(self.count.load(RELAXED) - 1, WRITE_ORD);
                self.children[slot - 1].swap(StdPtr::null_mut(), WRITE_ORD)
            }
        }
    }
}

/// One child slot per byte value.
struct Direct<V> {
    count: AtomicU16,
    children: [AtomicPtr<Node<V>>; 256],
}

impl<V> Direct<V> {
    fn new() -> Self {
        Self {
            count: AtomicU16::new(0),
            children: StdArray::from_fn(|_| AtomicPtr::new(StdPtr::null_mut())),
        }
    }

    #[inline]
    fn len(&self) -> usize {
        self.count.load(READ_ORD) as usize
    }

    fn child_from(&self, from: u8) -> Option<(u8, *mut Node<V>)> {
        (from..=u8::MAX).find_map(|b| {
            let child = self.children[b as usize].load(READ_ORD);
            (!child.is_null()).then_some((b, child))
        })
    }

    fn child_upto(&self, upto: u8) -> Option<(u8, *mut Node<V>)> {
        (0..=upto).rev().find_map(|b| {
            let child = self.children[b as usize].load(READ_ORD);
            (!child.is_null()).then_some((b, child))
        })
    }

    fn insert(&self, byte: u8, child: *mut Node<V>) {
        self.children[byte as usize].store(child, WRITE_ORD);
        self.count.store(self.count.load(RELAXED) + 1, WRITE_ORD);
    }

    fn erase(&self, byte: u8) -> *mut Node<V> {
        let old = self.children[byte as usize].swap(StdPtr::null_mut(), WRITE_ORD);
        if !old.is_null() {
            self.count.store(self.count.load(RELAXED) - 1, WRITE_ORD);
        }
        old
    }
}

enum Body<V> {
    N4(Flat<V, 4>),
    N16(Flat<V, 16>),
    N48(Box<Indexed<V>>),
    N256(Box<Direct<V>>),
}

/// Dispatch a call to whichever body variant is present.
macro_rules! with_body {
    ($body:expr, $b:ident => $e:expr) => {
        match $body {
            Body::N4($b) => $e,
            Body::N16($b) => $e,
            Body::N48($b) => $e,
            Body::N256($b) => $e,
        }
    };
}

// ============================================================================
//  Inner
// ============================================================================

/// Inner node: lock, compressed prefix, terminal slot and body.
pub(crate) struct Inner<V> {
    lock: OptLock,
    prefix_len: AtomicU32,
    prefix: [AtomicU8; MAX_PREFIX_LEN],
    terminal: AtomicPtr<Node<V>>,
    body: Body<V>,
}

impl<V> StdFmt::Debug for Inner<V> {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        f.debug_struct("Inner")
            .field("kind", &self.kind())
            .field("count", &self.count())
            .field("prefix_len", &self.prefix_len())
            .field("lock", &self.lock)
            .finish_non_exhaustive()
    }
}

impl<V> Inner<V> {
    /// Create an empty, unpublished inner node.
    ///
    /// `prefix` holds at least the first `min(full_len, MAX_PREFIX_LEN)`
    /// bytes of the compressed path; `full_len` is its true length.
    pub(crate) fn new(kind: NodeKind, prefix: &[u8], full_len: usize) -> Self {
        let body = match kind {
            NodeKind::Node4 => Body::N4(Flat::new()),
            NodeKind::Node16 => Body::N16(Flat::new()),
            NodeKind::Node48 => Body::N48(Box::new(Indexed::new())),
            NodeKind::Node256 => Body::N256(Box::new(Direct::new())),
        };
        let node = Self {
            lock: OptLock::new(),
            prefix_len: AtomicU32::new(0),
            prefix: StdArray::from_fn(|_| AtomicU8::new(0)),
            terminal: AtomicPtr::new(StdPtr::null_mut()),
            body,
        };
        node.set_prefix(prefix, full_len);
        node
    }

    #[inline]
    pub(crate) const fn lock(&self) -> &OptLock {
        &self.lock
    }

    pub(crate) const fn kind(&self) -> NodeKind {
        match self.body {
            Body::N4(_) => NodeKind::Node4,
            Body::N16(_) => NodeKind::Node16,
            Body::N48(_) => NodeKind::Node48,
            Body::N256(_) => NodeKind::Node256,
        }
    }

    /// Number of children in the body (the terminal slot is not counted).
    pub(crate) fn count(&self) -> usize {
        with_body!(&self.body, b => b.len())
    }

    /// Children plus the terminal leaf, if present.
    pub(crate) fn entries(&self) -> usize {
        self.count() + usize::from(!self.terminal.load(READ_ORD).is_null())
    }

    pub(crate) fn is_full(&self) -> bool {
        self.count() >= self.kind().capacity()
    }

    // ------------------------------------------------------------------------
    //  Prefix
    // ------------------------------------------------------------------------

    /// Full length of the compressed prefix.
    #[inline]
    pub(crate) fn prefix_len(&self) -> usize {
        self.prefix_len.load(READ_ORD) as usize
    }

    /// Inline prefix byte `i` (`i < MAX_PREFIX_LEN`).
    #[inline]
    pub(crate) fn prefix_byte(&self, i: usize) -> u8 {
        self.prefix[i].load(READ_ORD)
    }

    /// Replace the prefix. Caller holds the write lock or owns the node.
    pub(crate) fn set_prefix(&self, bytes: &[u8], full_len: usize) {
        let stored = full_len.min(MAX_PREFIX_LEN).min(bytes.len());
        for (slot, &b) in self.prefix.iter().zip(&bytes[..stored]) {
            slot.store(b, WRITE_ORD);
        }
        #[expect(clippy::cast_possible_truncation, reason = "keys are far below 4 GiB")]
        self.prefix_len.store(full_len as u32, WRITE_ORD);
    }

    /// Optimistic prefix check against `key[depth..]` using only inline
    /// bytes. Returns `false` if the key cannot be below this node.
    pub(crate) fn prefix_matches(&self, key: &[u8], depth: usize) -> bool {
        let plen = self.prefix_len();
        if key.len() < depth + plen {
            return false;
        }
        (0..plen.min(MAX_PREFIX_LEN)).all(|i| self.prefix_byte(i) == key[depth + i])
    }

    /// The full prefix of a node reached at `depth`.
    ///
    /// Prefixes longer than [`MAX_PREFIX_LEN`] are read from the smallest
    /// leaf below the node. The bytes are only meaningful once the caller
    /// validates the node's version.
    pub(crate) fn full_prefix(&self, depth: usize) -> Result<Vec<u8>, Restart> {
        let plen = self.prefix_len();
        if plen <= MAX_PREFIX_LEN {
            return Ok((0..plen).map(|i| self.prefix_byte(i)).collect());
        }
        let leaf = self.min_leaf()?;
        leaf.key()
            .get(depth..depth + plen)
            .map(<[u8]>::to_vec)
            .ok_or(Restart)
    }

    /// The smallest leaf below this node.
    ///
    /// Every leaf ever placed under a node shares the node's prefix bytes at
    /// the same absolute key offsets, so a concurrently replaced subtree
    /// still yields the right bytes. An empty descent restarts.
    pub(crate) fn min_leaf(&self) -> Result<&Leaf<V>, Restart> {
        let mut node = self;
        loop {
            let next = match node.next_entry(-1) {
                Some((_, child)) => child,
                None => return Err(Restart),
            };
            // SAFETY: children are valid nodes from Box::into_raw; the caller
            // holds a seize guard so retired nodes are not yet freed.
            match unsafe { &*next } {
                Node::Leaf(leaf) => return Ok(leaf),
                Node::Inner(inner) => node = inner,
            }
        }
    }

    // ------------------------------------------------------------------------
    //  Child access (optimistic)
    // ------------------------------------------------------------------------

    /// Load the child on `edge`, or null.
    pub(crate) fn load(&self, edge: Edge) -> *mut Node<V> {
        match edge {
            Edge::Terminal => self.terminal.load(READ_ORD),
            Edge::Byte(byte) => match &self.body {
                Body::N4(b) => b.child(byte),
                Body::N16(b) => b.child(byte),
                Body::N48(b) => b.child_at(byte),
                Body::N256(b) => b.children[byte as usize].load(READ_ORD),
            },
        }
    }

    /// First entry at a position strictly greater than `after`.
    ///
    /// Positions follow [`Edge::position`]; `-1` is before everything.
    pub(crate) fn next_entry(&self, after: i32) -> Option<(i32, *mut Node<V>)> {
        if after < 0 {
            let terminal = self.terminal.load(READ_ORD);
            if !terminal.is_null() {
                return Some((0, terminal));
            }
        }
        let from = u8::try_from(after.max(0)).ok()?;
        with_body!(&self.body, b => b.child_from(from)).map(|(byte, c)| (i32::from(byte) + 1, c))
    }

    /// Last entry at a position strictly smaller than `before`.
    ///
    /// `257` is after everything.
    pub(crate) fn prev_entry(&self, before: i32) -> Option<(i32, *mut Node<V>)> {
        if before >= 2 {
            let upto = u8::try_from((before - 2).min(255)).unwrap_or(u8::MAX);
            if let Some((byte, c)) = with_body!(&self.body, b => b.child_upto(upto)) {
                return Some((i32::from(byte) + 1, c));
            }
        }
        if before > 0 {
            let terminal = self.terminal.load(READ_ORD);
            if !terminal.is_null() {
                return Some((0, terminal));
            }
        }
        None
    }

    // ------------------------------------------------------------------------
    //  Mutation (write lock held)
    // ------------------------------------------------------------------------

    /// Add a child under a byte that has none. The body must not be full.
    pub(crate) fn insert_child(&self, byte: u8, child: *mut Node<V>) {
        match &self.body {
            Body::N4(b) => b.insert(byte, child),
            Body::N16(b) => b.insert(byte, child),
            Body::N48(b) => b.insert(byte, child),
            Body::N256(b) => b.insert(byte, child),
        }
    }

    /// Put `child` on an empty `edge`. The body must have room.
    pub(crate) fn place(&self, edge: Edge, child: *mut Node<V>) {
        match edge {
            Edge::Terminal => self.terminal.store(child, WRITE_ORD),
            Edge::Byte(byte) => self.insert_child(byte, child),
        }
    }

    /// Store `child` on `edge`, returning the node it displaced.
    ///
    /// Storing on an empty terminal fills it; an empty byte edge is left
    /// untouched and null is returned.
    pub(crate) fn replace(&self, edge: Edge, child: *mut Node<V>) -> *mut Node<V> {
        match edge {
            Edge::Terminal => self.terminal.swap(child, WRITE_ORD),
            Edge::Byte(byte) => match &self.body {
                Body::N4(b) => b.replace(byte, child),
                Body::N16(b) => b.replace(byte, child),
                Body::N48(b) => b.replace(byte, child),
                Body::N256(b) => {
                    let slot = &b.children[byte as usize];
                    if slot.load(RELAXED).is_null() {
                        StdPtr::null_mut()
                    } else {
                        slot.swap(child, WRITE_ORD)
                    }
                }
            },
        }
    }

    /// Remove the child on `edge`, returning it (null if absent).
    pub(crate) fn erase(&self, edge: Edge) -> *mut Node<V> {
        match edge {
            Edge::Terminal => self.terminal.swap(StdPtr::null_mut(), WRITE_ORD),
            Edge::Byte(byte) => match &self.body {
                Body::N4(b) => b.erase(byte),
                Body::N16(b) => b.erase(byte),
                Body::N48(b) => b.erase(byte),
                Body::N256(b) => b.erase(byte),
            },
        }
    }

    /// Copy this node into a fresh, unpublished node of `kind`.
    ///
    /// Prefix, terminal and children carry over, except the child under
    /// `skip`. The caller holds this node's write lock and must make sure
    /// the remaining children fit `kind`.
    pub(crate) fn rebuild(&self, kind: NodeKind, skip: Option<u8>) -> Self {
        let plen = self.prefix_len();
        let inline: Vec<u8> = (0..plen.min(MAX_PREFIX_LEN))
            .map(|i| self.prefix_byte(i))
            .collect();
        let node = Self::new(kind, &inline, plen);
        node.terminal
            .store(self.terminal.load(RELAXED), RELAXED);
        let mut from = 0u8;
        while let Some((byte, child)) = with_body!(&self.body, b => b.child_from(from)) {
            if skip != Some(byte) {
                node.insert_child(byte, child);
            }
            match byte.checked_add(1) {
                Some(next) => from = next,
                None => break,
            }
        }
        node
    }

    /// Every child and the terminal leaf, in key order.
    pub(crate) fn entries_in_order(&self) -> Vec<(Edge, *mut Node<V>)> {
        let mut out = Vec::with_capacity(self.count() + 1);
        let mut pos = -1;
        while let Some((next, child)) = self.next_entry(pos) {
            out.push((Edge::from_position(next), child));
            pos = next;
        }
        out
    }
}

// ============================================================================
//  Tests
// ============================================================================
