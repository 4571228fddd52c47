//! Running a simulator on its own thread.
//!
//! A [`Session`] owns a [`Simulator`] on a dedicated thread.
//! Every request (loading, stepping, running, resetting) is sent to that thread
//! and handled one at a time, so the machine is only ever mutated by its owner.
//!
//! Other threads observe the machine through [`Snapshot`]s,
//! which are published after every request (and periodically while running).
//! A snapshot is always taken between instructions.
//!
//! ```
//! use sicxe_ensemble::parse::parse_ast;
//! use sicxe_ensemble::sim::session::Session;
//! use sicxe_ensemble::sim::ExecState;
//!
//! let session = Session::new(Default::default());
//!
//! let nodes = parse_ast("PROG START 0x100\n LDA #1\nHALT J HALT\n END PROG").unwrap();
//! session.load_assembly(nodes).unwrap();
//! session.run().unwrap();
//!
//! let snapshot = session.snapshot();
//! assert_eq!(snapshot.pc(), 0x103);
//! assert_eq!(snapshot.state, ExecState::Halted);
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread::JoinHandle;

use crossbeam_channel as cbc;

use crate::asm::{ProgramImage, SymbolTable};
use crate::ast::asm::SyntaxNode;
use crate::err::LoadErr;

use super::mem::RegFile;
use super::{ExecState, SimErr, SimFlags, Simulator, StepTrace, StopFlag};

/// Errors from a request to a [`Session`].
#[derive(Debug, PartialEq, Eq, Clone, thiserror::Error)]
pub enum SessionErr {
    /// The session's thread is no longer running.
    #[error("simulator session is closed")]
    Closed,
    /// The program could not be loaded.
    #[error(transparent)]
    Load(#[from] LoadErr),
    /// Execution failed.
    #[error(transparent)]
    Sim(#[from] SimErr),
}
impl crate::err::Error for SessionErr {
    fn pos(&self) -> Option<crate::err::ErrPos> {
        match self {
            SessionErr::Closed => None,
            SessionErr::Load(e) => crate::err::Error::pos(e),
            SessionErr::Sim(e) => crate::err::Error::pos(e),
        }
    }

    fn help(&self) -> Option<std::borrow::Cow<str>> {
        match self {
            SessionErr::Closed => Some("the session thread panicked or was shut down".into()),
            SessionErr::Load(e) => crate::err::Error::help(e),
            SessionErr::Sim(e) => crate::err::Error::help(e),
        }
    }
}

/// Configuration for a [`Session`].
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct SessionConfig {
    /// Flags for the owned simulator.
    pub flags: SimFlags,
    /// While running, a snapshot is published every this many instructions.
    ///
    /// A value of 0 only publishes snapshots between requests.
    pub snapshot_interval: u64,
}
impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            flags: Default::default(),
            snapshot_interval: 4096,
        }
    }
}

/// A consistent view of the machine, taken between two instructions.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Snapshot {
    /// The registers.
    pub registers: RegFile,
    /// The execution state.
    pub state: ExecState,
    /// The number of instructions run since the last reset.
    pub instructions_run: u64,
    /// Increases with every published snapshot.
    pub version: u64,
}
impl Snapshot {
    fn of(sim: &Simulator, version: u64) -> Self {
        Self {
            registers: sim.reg_file.clone(),
            state: sim.state(),
            instructions_run: sim.instructions_run,
            version,
        }
    }

    /// The program counter at the time of the snapshot.
    pub fn pc(&self) -> u32 {
        self.registers.pc()
    }
}

type Reply<T> = cbc::Sender<T>;

enum Request {
    LoadObject(String, Reply<Result<ProgramImage, LoadErr>>),
    LoadAssembly(Vec<SyntaxNode>, Reply<Result<(ProgramImage, SymbolTable), LoadErr>>),
    Step(Reply<Result<StepTrace, SimErr>>),
    Run { limit: Option<u64>, reply: Reply<Result<(), SimErr>> },
    Reset(Reply<()>),
    EmitObject(Reply<String>),
    ReadMemory { addr: u32, len: usize, reply: Reply<Result<Vec<u8>, SimErr>> },
    Shutdown,
}
impl Request {
    fn name(&self) -> &'static str {
        match self {
            Request::LoadObject(..)    => "load_object",
            Request::LoadAssembly(..)  => "load_assembly",
            Request::Step(_)           => "step",
            Request::Run { .. }        => "run",
            Request::Reset(_)          => "reset",
            Request::EmitObject(_)     => "emit_object",
            Request::ReadMemory { .. } => "read_memory",
            Request::Shutdown          => "shutdown",
        }
    }
}

/// The published snapshot, shared between the owner thread and observers.
type SnapshotSlot = Arc<RwLock<Arc<Snapshot>>>;

/// Publishes snapshots from the owner thread.
struct Publisher {
    slot: SnapshotSlot,
    version: u64,
}
impl Publisher {
    fn publish(&mut self, sim: &Simulator) {
        self.version += 1;
        let snapshot = Arc::new(Snapshot::of(sim, self.version));
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = snapshot;
    }
}

/// A simulator owned by its own thread.
///
/// Requests block until the owner thread has handled them.
/// Since requests are handled in order, a request sent during a run
/// is handled once the run ends (see [`Session::stop`]).
///
/// Dropping the session stops any run and joins the owner thread.
pub struct Session {
    requests: cbc::Sender<Request>,
    stop_flag: StopFlag,
    closing: Arc<AtomicBool>,
    snapshot: SnapshotSlot,
    handle: Option<JoinHandle<()>>,
}
impl Session {
    /// Starts a session with a new simulator.
    pub fn new(config: SessionConfig) -> Self {
        Self::with_simulator(Simulator::new(config.flags), config)
    }

    /// Starts a session which takes ownership of an existing simulator.
    ///
    /// This can be used to connect devices before the session starts.
    /// The simulator's flags are kept (and [`SessionConfig::flags`] is ignored).
    pub fn with_simulator(sim: Simulator, config: SessionConfig) -> Self {
        let (tx, rx) = cbc::unbounded();
        let stop_flag = Arc::clone(sim.stop_flag());
        let closing = Arc::new(AtomicBool::new(false));
        let snapshot = Arc::new(RwLock::new(Arc::new(Snapshot::of(&sim, 0))));

        let publisher = Publisher { slot: Arc::clone(&snapshot), version: 0 };
        let owner = Owner { publisher, closing: Arc::clone(&closing), interval: config.snapshot_interval };
        let handle = std::thread::spawn(move || owner.serve(sim, rx));

        Self { requests: tx, stop_flag, closing, snapshot, handle: Some(handle) }
    }

    fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Request) -> Result<T, SessionErr> {
        let (tx, rx) = cbc::bounded(1);
        self.requests.send(make(tx)).map_err(|_| SessionErr::Closed)?;
        rx.recv().map_err(|_| SessionErr::Closed)
    }

    /// Reads an object file and loads it into the simulator.
    pub fn load_object(&self, records: &str) -> Result<ProgramImage, SessionErr> {
        let records = records.to_string();
        Ok(self.request(|r| Request::LoadObject(records, r))??)
    }

    /// Assembles a program and loads it into the simulator.
    pub fn load_assembly(&self, nodes: Vec<SyntaxNode>) -> Result<(ProgramImage, SymbolTable), SessionErr> {
        Ok(self.request(|r| Request::LoadAssembly(nodes, r))??)
    }

    /// Executes one instruction.
    pub fn step(&self) -> Result<StepTrace, SessionErr> {
        Ok(self.request(Request::Step)??)
    }

    /// Runs until the program halts or the session is stopped.
    pub fn run(&self) -> Result<(), SessionErr> {
        Ok(self.request(|reply| Request::Run { limit: None, reply })??)
    }

    /// Runs until the program halts, the session is stopped, or `max_steps` instructions have run.
    pub fn run_with_limit(&self, max_steps: u64) -> Result<(), SessionErr> {
        Ok(self.request(|reply| Request::Run { limit: Some(max_steps), reply })??)
    }

    /// Resets the simulator.
    pub fn reset(&self) -> Result<(), SessionErr> {
        self.request(Request::Reset)
    }

    /// Writes the loaded program as an object file.
    pub fn emit_object(&self) -> Result<String, SessionErr> {
        self.request(Request::EmitObject)
    }

    /// Reads `len` bytes of memory starting at `addr`.
    pub fn read_memory(&self, addr: u32, len: usize) -> Result<Vec<u8>, SessionErr> {
        Ok(self.request(|reply| Request::ReadMemory { addr, len, reply })??)
    }

    /// Stops the current run.
    ///
    /// This does not wait for the owner thread, so it can be called while another thread
    /// is blocked on [`Session::run`].
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::Relaxed);
    }

    /// The most recently published snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        let slot = self.snapshot.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&slot)
    }

    /// Stops the owner thread and waits for it to finish.
    pub fn shutdown(mut self) -> Result<(), SessionErr> {
        self.close()
    }

    fn close(&mut self) -> Result<(), SessionErr> {
        let Some(handle) = self.handle.take() else { return Ok(()) };

        // A run which has not started yet would clear the stop flag.
        self.closing.store(true, Ordering::Relaxed);
        self.stop();
        // If this fails, the thread has already exited.
        let _ = self.requests.send(Request::Shutdown);
        handle.join().map_err(|_| SessionErr::Closed)
    }
}
impl Drop for Session {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("snapshot", &self.snapshot())
            .finish_non_exhaustive()
    }
}

/// State of the owner thread.
struct Owner {
    publisher: Publisher,
    closing: Arc<AtomicBool>,
    interval: u64,
}
impl Owner {
    /// The owner thread's event loop.
    fn serve(mut self, mut sim: Simulator, requests: cbc::Receiver<Request>) {
        for request in requests {
            tracing::debug!(request = request.name(), "session request");

            // A requester which stopped waiting does not need its reply.
            match request {
                Request::LoadObject(records, reply) => {
                    let _ = reply.send(sim.load_object(&records));
                },
                Request::LoadAssembly(nodes, reply) => {
                    let _ = reply.send(sim.load_assembly(&nodes));
                },
                Request::Step(reply) => {
                    let _ = reply.send(sim.step_in());
                },
                Request::Run { limit, reply } => {
                    let interval = self.interval;
                    let start = sim.instructions_run;
                    let mut next_publish = start.saturating_add(interval);

                    let result = sim.run_while(|sim| {
                        if self.closing.load(Ordering::Relaxed) {
                            return false;
                        }
                        if interval != 0 && sim.instructions_run >= next_publish {
                            self.publisher.publish(sim);
                            next_publish = sim.instructions_run.saturating_add(interval);
                        }
                        let run = sim.instructions_run.wrapping_sub(start);
                        limit.map_or(true, |max| run < max)
                    });
                    let _ = reply.send(result);
                },
                Request::Reset(reply) => {
                    sim.reset();
                    let _ = reply.send(());
                },
                Request::EmitObject(reply) => {
                    let _ = reply.send(sim.emit_object());
                },
                Request::ReadMemory { addr, len, reply } => {
                    let _ = reply.send(sim.mem.slice(addr, len).map(<[u8]>::to_vec));
                },
                Request::Shutdown => break,
            }

            self.publisher.publish(&sim);
        }

        tracing::debug!("session closed");
    }
}
