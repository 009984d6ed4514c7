//! Thread-local call-graph collector with RAII guards.
//!
//! `enable()` starts a session on the current thread and opens the root frame
//! `main()`. Each instrumented function calls `enter(name)`, which pushes a
//! frame onto the session stack and returns a `Guard`. When the guard drops (on
//! any exit path) the frame is popped and its measurements are accumulated on
//! the `parent==>child` edge. `disable()` closes whatever is still open and
//! hands back the edges in first-seen order.
//!
//! Ignored functions never get a frame, so their callees are attributed to the
//! nearest non-ignored caller. A function re-entered while already on the stack
//! is labelled `name@<level>`, which keeps recursive edges acyclic.
//!
//! Sessions are per thread. Every session gets a fresh generation number; a
//! guard created under an earlier session is inert when it drops. Within a
//! session every frame carries a sequence number, and a guard only unwinds if
//! its own frame is still on the stack.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Label of the root frame opened by `enable()`.
pub const ROOT: &str = "main()";

static GENERATION: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static SESSION: RefCell<Option<Session>> = const { RefCell::new(None) };
}

/// Which optional metrics a session records. Wall time and call counts are
/// always collected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flags {
    pub cpu: bool,
    pub memory: bool,
}

/// Accumulated measurements for one caller/callee pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeRecord {
    /// Caller label; `None` only for the root edge.
    pub parent: Option<String>,
    pub child: String,
    pub calls: u64,
    pub wall_us: u64,
    pub cpu_us: Option<u64>,
    pub mem_bytes: Option<i64>,
    pub peak_bytes: Option<i64>,
}

impl EdgeRecord {
    /// `parent==>child`, or just the child label for the root edge.
    pub fn key(&self) -> String {
        edge_key(self.parent.as_deref(), &self.child)
    }
}

fn edge_key(parent: Option<&str>, child: &str) -> String {
    match parent {
        Some(parent) => format!("{parent}==>{child}"),
        None => child.to_owned(),
    }
}

struct Frame {
    seq: u64,
    name: String,
    label: String,
    start: Instant,
    cpu_start_ns: u64,
    mem_start: i64,
    peak_start: i64,
}

struct Session {
    generation: u64,
    flags: Flags,
    ignored: HashSet<String>,
    stack: Vec<Frame>,
    next_seq: u64,
    edges: Vec<EdgeRecord>,
    index: HashMap<String, usize>,
}

impl Session {
    fn new(flags: Flags, ignored: &[String]) -> Self {
        let mut session = Self {
            generation: GENERATION.fetch_add(1, Ordering::Relaxed),
            flags,
            ignored: ignored.iter().cloned().collect(),
            stack: Vec::new(),
            next_seq: 0,
            edges: Vec::new(),
            index: HashMap::new(),
        };
        session.push(ROOT);
        session
    }

    /// Push a frame and return its depth and sequence number.
    fn push(&mut self, name: &str) -> (usize, u64) {
        let level = self.stack.iter().filter(|f| f.name == name).count();
        let label = if level == 0 {
            name.to_owned()
        } else {
            format!("{name}@{level}")
        };
        let depth = self.stack.len();
        let seq = self.next_seq;
        self.next_seq += 1;
        self.stack.push(Frame {
            seq,
            name: name.to_owned(),
            label,
            start: Instant::now(),
            cpu_start_ns: if self.flags.cpu {
                crate::cpu_clock::cpu_now_ns()
            } else {
                0
            },
            mem_start: crate::alloc::current_bytes(),
            peak_start: crate::alloc::peak_bytes(),
        });
        (depth, seq)
    }

    /// Pop frames until the stack is `depth` long, recording each one.
    fn unwind_to(&mut self, depth: usize) {
        while self.stack.len() > depth {
            let Some(frame) = self.stack.pop() else {
                break;
            };
            self.close(frame);
        }
    }

    fn close(&mut self, frame: Frame) {
        let wall_us = frame.start.elapsed().as_micros() as u64;
        let cpu_us = self
            .flags
            .cpu
            .then(|| crate::cpu_clock::cpu_now_ns().saturating_sub(frame.cpu_start_ns) / 1_000);
        let (mem_bytes, peak_bytes) = if self.flags.memory {
            (
                Some(crate::alloc::current_bytes() - frame.mem_start),
                Some(crate::alloc::peak_bytes() - frame.peak_start),
            )
        } else {
            (None, None)
        };

        let parent = self.stack.last().map(|f| f.label.clone());
        let key = edge_key(parent.as_deref(), &frame.label);
        let slot = match self.index.get(&key) {
            Some(&i) => i,
            None => {
                self.edges.push(EdgeRecord {
                    parent,
                    child: frame.label,
                    calls: 0,
                    wall_us: 0,
                    cpu_us: cpu_us.map(|_| 0),
                    mem_bytes: mem_bytes.map(|_| 0),
                    peak_bytes: peak_bytes.map(|_| 0),
                });
                self.index.insert(key, self.edges.len() - 1);
                self.edges.len() - 1
            }
        };

        let edge = &mut self.edges[slot];
        edge.calls += 1;
        edge.wall_us += wall_us;
        add(&mut edge.cpu_us, cpu_us);
        add(&mut edge.mem_bytes, mem_bytes);
        add(&mut edge.peak_bytes, peak_bytes);
    }
}

fn add<T: std::ops::AddAssign>(total: &mut Option<T>, sample: Option<T>) {
    if let (Some(total), Some(sample)) = (total.as_mut(), sample) {
        *total += sample;
    }
}

/// Start a profiling session on the current thread.
///
/// Any session already running on this thread is discarded.
pub fn enable(flags: Flags, ignored: &[String]) {
    SESSION.with(|cell| {
        *cell.borrow_mut() = Some(Session::new(flags, ignored));
    });
}

/// Stop the current thread's session and return its edges.
///
/// Returns `None` when no session was running.
pub fn disable() -> Option<Vec<EdgeRecord>> {
    let mut session = SESSION.with(|cell| cell.borrow_mut().take())?;
    session.unwind_to(0);
    Some(session.edges)
}

/// Whether a session is running on the current thread.
pub fn is_enabled() -> bool {
    SESSION.with(|cell| cell.borrow().is_some())
}

/// RAII frame guard. Records the frame's measurements on drop.
///
/// Tied to the thread that created it: frames live in thread-local storage.
#[must_use = "dropping the guard immediately records ~0us; bind it with `let _guard = ...`"]
pub struct Guard {
    generation: u64,
    depth: usize,
    seq: u64,
    _not_send: PhantomData<*const ()>,
}

impl Guard {
    fn inert() -> Self {
        Self {
            generation: 0,
            depth: 0,
            seq: 0,
            _not_send: PhantomData,
        }
    }
}

impl Drop for Guard {
    fn drop(&mut self) {
        if self.generation == 0 {
            return;
        }
        let _ = SESSION.try_with(|cell| {
            if let Ok(mut slot) = cell.try_borrow_mut()
                && let Some(session) = slot.as_mut()
                && session.generation == self.generation
                && session.stack.get(self.depth).map(|f| f.seq) == Some(self.seq)
            {
                // Closing a frame also closes anything leaked above it.
                session.unwind_to(self.depth);
            }
        });
    }
}

/// Open a frame for `name`. A no-op guard is returned when no session is
/// running or when `name` is on the session's ignore list.
pub fn enter(name: &str) -> Guard {
    SESSION.with(|cell| {
        let mut slot = cell.borrow_mut();
        match slot.as_mut() {
            Some(session) if !session.ignored.contains(name) => {
                let (depth, seq) = session.push(name);
                Guard {
                    generation: session.generation,
                    depth,
                    seq,
                    _not_send: PhantomData,
                }
            }
            _ => Guard::inert(),
        }
    })
}

#[cfg(test)]
fn burn_cpu(iterations: u64) {
    let mut buf = [0x42u8; 4096];
    for i in 0..iterations {
        for b in &mut buf {
            *b = b.wrapping_add(i as u8).wrapping_mul(31);
        }
    }
    std::hint::black_box(&buf);
}
