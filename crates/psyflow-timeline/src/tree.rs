//! Chunk tree
//!
//! Arena of chunks addressed by [`ChunkIndex`]. A control chunk owns the
//! indices of its children; every chunk refers back to its parent by index.
//! Exactly one block is active while the tree is incomplete: the one reached
//! by following the cursors down from the root.

use std::fmt;

use tracing::debug;

use psyflow_core::{ChunkId, Trial, TrialRecord};
use psyflow_data::DataStore;
use psyflow_random::Randomizer;

use crate::{ChunkKind, ConditionFn, ContinueFn};

/// Position of a chunk in the arena
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChunkIndex(usize);

impl ChunkIndex {
    pub const ROOT: ChunkIndex = ChunkIndex(0);

    #[inline]
    pub fn get(self) -> usize {
        self.0
    }
}

impl fmt::Debug for ChunkIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkIndex({})", self.0)
    }
}

/// Kind of a chunk as reported by [`ChunkTree::chunk_type`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChunkType {
    Root,
    Linear,
    While,
    If,
    Block,
}

#[derive(Clone)]
enum Flow {
    Root,
    Linear,
    While(ContinueFn),
    If(ConditionFn),
}

#[derive(Clone)]
struct Block {
    trials: Vec<Trial>,
    randomize_order: bool,
    /// Order already drawn for the current entry
    shuffled: bool,
}

#[derive(Clone)]
enum Body {
    Control { flow: Flow, children: Vec<ChunkIndex> },
    Block(Block),
}

#[derive(Clone)]
struct Chunk {
    parent: Option<ChunkIndex>,
    /// Position among the parent's nodes
    relative: usize,
    cursor: usize,
    resets: u32,
    /// Forced end or latched completion
    done: bool,
    /// `if` only: condition already evaluated for this entry
    entered: bool,
    body: Body,
}

impl Chunk {
    fn new(parent: Option<ChunkIndex>, relative: usize, body: Body) -> Self {
        Chunk {
            parent,
            relative,
            cursor: 0,
            resets: 0,
            done: false,
            entered: false,
            body,
        }
    }
}

/// Progress counters of a running session
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Progress {
    pub total_trials: usize,
    pub current_trial_global: u64,
    /// Position inside the active block, `None` once the tree is complete
    pub current_trial_local: Option<usize>,
    /// Nodes of the top-level timeline
    pub total_chunks: usize,
    pub current_chunk: usize,
}

impl Progress {
    pub fn percent_complete(&self) -> f64 {
        if self.total_chunks == 0 {
            return 100.0;
        }
        100.0 * self.current_chunk as f64 / self.total_chunks as f64
    }
}

/// The experiment's control-flow tree
pub struct ChunkTree {
    chunks: Vec<Chunk>,
    rng: Randomizer,
}

impl ChunkTree {
    /// Tree holding only an empty root. Chunks are added by the builder.
    pub fn new(rng: Randomizer) -> Self {
        ChunkTree {
            chunks: vec![Chunk::new(
                None,
                0,
                Body::Control {
                    flow: Flow::Root,
                    children: Vec::new(),
                },
            )],
            rng,
        }
    }

    pub fn root(&self) -> ChunkIndex {
        ChunkIndex::ROOT
    }

    /// Append a control chunk to `parent`'s timeline
    pub fn add_chunk(&mut self, parent: ChunkIndex, relative: usize, kind: &ChunkKind) -> ChunkIndex {
        let flow = match kind {
            ChunkKind::Linear => Flow::Linear,
            ChunkKind::While(f) => Flow::While(f.clone()),
            ChunkKind::If(f) => Flow::If(f.clone()),
        };
        self.push(
            parent,
            relative,
            Body::Control {
                flow,
                children: Vec::new(),
            },
        )
    }

    /// Append a block of trials to `parent`'s timeline
    pub fn add_block(
        &mut self,
        parent: ChunkIndex,
        relative: usize,
        trials: Vec<Trial>,
        randomize_order: bool,
    ) -> ChunkIndex {
        self.push(
            parent,
            relative,
            Body::Block(Block {
                trials,
                randomize_order,
                shuffled: false,
            }),
        )
    }

    fn push(&mut self, parent: ChunkIndex, relative: usize, body: Body) -> ChunkIndex {
        let index = ChunkIndex(self.chunks.len());
        self.chunks.push(Chunk::new(Some(parent), relative, body));
        if let Body::Control { children, .. } = &mut self.chunks[parent.0].body {
            children.push(index);
        }
        index
    }

    /// Number of chunks in the arena, blocks included
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn chunk_type(&self, index: ChunkIndex) -> ChunkType {
        match &self.chunks[index.0].body {
            Body::Block(_) => ChunkType::Block,
            Body::Control { flow, .. } => match flow {
                Flow::Root => ChunkType::Root,
                Flow::Linear => ChunkType::Linear,
                Flow::While(_) => ChunkType::While,
                Flow::If(_) => ChunkType::If,
            },
        }
    }

    pub fn parent(&self, index: ChunkIndex) -> Option<ChunkIndex> {
        self.chunks[index.0].parent
    }

    pub fn children(&self, index: ChunkIndex) -> &[ChunkIndex] {
        match &self.chunks[index.0].body {
            Body::Control { children, .. } => children,
            Body::Block(_) => &[],
        }
    }

    /// 1-based pass number of a chunk
    pub fn iteration(&self, index: ChunkIndex) -> u32 {
        self.chunks[index.0].resets + 1
    }

    /// Total number of trials, counting every block once
    pub fn length(&self) -> usize {
        self.chunks
            .iter()
            .map(|chunk| match &chunk.body {
                Body::Block(block) => block.trials.len(),
                Body::Control { .. } => 0,
            })
            .sum()
    }

    /// Id of a chunk instance; carries the reset count of every ancestor
    pub fn chunk_id(&self, index: ChunkIndex) -> ChunkId {
        let chunk = &self.chunks[index.0];
        match chunk.parent {
            None => ChunkId::root(chunk.resets),
            Some(parent) => self.chunk_id(parent).child(chunk.relative, chunk.resets),
        }
    }

    /// Records produced by the current instance of a chunk
    pub fn generated_data<'s>(&self, index: ChunkIndex, store: &'s DataStore) -> Vec<&'s TrialRecord> {
        store.trials_from_chunk(&self.chunk_id(index))
    }

    /// Chunks from the root down to the active block. Ends early at a
    /// control chunk whose cursor ran off its timeline.
    pub fn active_path(&self) -> Vec<ChunkIndex> {
        let mut path = vec![ChunkIndex::ROOT];
        let mut index = ChunkIndex::ROOT;
        while let Body::Control { children, .. } = &self.chunks[index.0].body {
            match children.get(self.chunks[index.0].cursor) {
                Some(&child) => {
                    path.push(child);
                    index = child;
                }
                None => break,
            }
        }
        path
    }

    fn active_block(&self) -> Option<ChunkIndex> {
        self.active_path()
            .last()
            .copied()
            .filter(|&index| self.chunk_type(index) == ChunkType::Block)
    }

    /// Id of the chunk that contains the active block
    pub fn active_chunk_id(&self) -> Option<ChunkId> {
        let block = self.active_block()?;
        self.parent(block).map(|parent| self.chunk_id(parent))
    }

    /// Position of the next trial inside the active block
    pub fn current_trial_local_index(&self) -> Option<usize> {
        let block = self.active_block()?;
        let chunk = &self.chunks[block.0];
        match &chunk.body {
            Body::Block(b) if chunk.cursor < b.trials.len() => Some(chunk.cursor),
            _ => None,
        }
    }

    pub fn progress(&self, current_trial_global: u64) -> Progress {
        let root = &self.chunks[ChunkIndex::ROOT.0];
        Progress {
            total_trials: self.length(),
            current_trial_global,
            current_trial_local: self.current_trial_local_index(),
            total_chunks: self.children(ChunkIndex::ROOT).len(),
            current_chunk: root.cursor,
        }
    }

    /// True once the whole experiment has run
    pub fn is_complete(&mut self, store: &DataStore) -> bool {
        self.chunk_complete(ChunkIndex::ROOT, store)
    }

    /// Kind-specific completion check. For `while` it may reset the chunk;
    /// for `if` it evaluates the condition once per entry. A positive
    /// result for either is latched in `done`.
    pub fn chunk_complete(&mut self, index: ChunkIndex, store: &DataStore) -> bool {
        let chunk = &self.chunks[index.0];
        if chunk.done {
            return true;
        }
        let (flow, len) = match &chunk.body {
            Body::Block(block) => return chunk.cursor >= block.trials.len(),
            Body::Control { flow, children } => (flow.clone(), children.len()),
        };
        let finished = chunk.cursor >= len;
        let entered = chunk.entered;

        match flow {
            Flow::Root | Flow::Linear => finished,
            Flow::While(continue_fn) => {
                if !finished {
                    return false;
                }
                let generated = self.generated_data(index, store);
                if continue_fn(generated.as_slice()) {
                    debug!(chunk = %self.chunk_id(index), "while chunk runs again");
                    self.reset(index);
                    false
                } else {
                    self.chunks[index.0].done = true;
                    true
                }
            }
            Flow::If(condition) => {
                if !entered {
                    self.chunks[index.0].entered = true;
                    if !condition(store) {
                        debug!(chunk = %self.chunk_id(index), "if condition false, skipping chunk");
                        self.chunks[index.0].done = true;
                        return true;
                    }
                }
                if finished {
                    self.chunks[index.0].done = true;
                }
                finished
            }
        }
    }

    /// Rewind a chunk and everything below it for another pass
    pub fn reset(&mut self, index: ChunkIndex) {
        let mut stack = vec![index];
        while let Some(current) = stack.pop() {
            let chunk = &mut self.chunks[current.0];
            chunk.cursor = 0;
            chunk.done = false;
            chunk.entered = false;
            chunk.resets += 1;
            match &mut chunk.body {
                Body::Block(block) => block.shuffled = false,
                Body::Control { children, .. } => stack.extend(children.iter().copied()),
            }
        }
    }

    /// Make `index` point at a runnable descendant, popping up through
    /// completed chunks. `None` once the root is complete.
    fn settle(&mut self, mut index: ChunkIndex, store: &DataStore) -> Option<ChunkIndex> {
        loop {
            if !self.chunk_complete(index, store) {
                loop {
                    let chunk = &self.chunks[index.0];
                    let Body::Control { children, .. } = &chunk.body else {
                        return Some(index);
                    };
                    let Some(&child) = children.get(chunk.cursor) else {
                        // Ran off the timeline, re-check the chunk itself
                        break;
                    };
                    if self.chunk_complete(child, store) {
                        self.chunks[index.0].cursor += 1;
                    } else {
                        return Some(index);
                    }
                }
                continue;
            }
            let parent = self.chunks[index.0].parent?;
            self.chunks[parent.0].cursor += 1;
            index = parent;
        }
    }

    /// The trial to present next, or `None` when the experiment is over
    pub fn next(&mut self, store: &DataStore) -> Option<Trial> {
        let mut index = ChunkIndex::ROOT;
        loop {
            index = self.settle(index, store)?;
            let chunk = &mut self.chunks[index.0];
            match &mut chunk.body {
                Body::Control { children, .. } => index = *children.get(chunk.cursor)?,
                Body::Block(block) => {
                    if chunk.cursor == 0 && block.randomize_order && !block.shuffled {
                        self.rng.shuffle(&mut block.trials);
                        block.shuffled = true;
                    }
                    return block.trials.get(chunk.cursor).cloned();
                }
            }
        }
    }

    /// Move past the trial that just finished. A force-ended chunk on the
    /// active path is left without consuming its remaining trials.
    pub fn advance(&mut self, store: &DataStore) {
        let path = self.active_path();
        if let Some(&ended) = path.iter().find(|index| self.chunks[index.0].done) {
            self.settle(ended, store);
            return;
        }
        if let Some(block) = self.active_block() {
            self.chunks[block.0].cursor += 1;
            self.settle(block, store);
        }
    }

    /// Force-end the chunk containing the active block
    pub fn end_current_chunk(&mut self) {
        if let Some(parent) = self.active_block().and_then(|block| self.parent(block)) {
            debug!(chunk = %self.chunk_id(parent), "ending current chunk");
            self.chunks[parent.0].done = true;
        }
    }

    /// Force-end the whole tree
    pub fn end(&mut self) {
        self.chunks[ChunkIndex::ROOT.0].done = true;
    }
}

impl fmt::Debug for ChunkTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkTree")
            .field("chunks", &self.chunks.len())
            .field("trials", &self.length())
            .field("active", &self.active_path())
            .finish()
    }
}
