//! The script host driver (C7): owns the script cache, the deferred
//! action queue and the action table, and is the single entry point an
//! embedding application calls to run or resume a script.
//!
//! Grounded on the split the teacher draws between `execution_engine.rs`
//! (the low-level interpreter, here `interpreter.rs`) and
//! `application_engine.rs` (the host-facing driver that owns caching and
//! interop dispatch) — `ScriptHost` plays the `ApplicationEngine` role,
//! generalized from Neo contract invocation onto NWScript's resref-keyed
//! script cache and `AssignCommand`/`DelayCommand` continuation queue.

use crate::action::ActionTable;
use crate::continuation::SavedState;
use crate::error::{HostError, HostResult};
use crate::interpreter::{EngineLimits, Interpreter};
use crate::jit::JitEngine;
use crate::timer::DeferredQueue;
use crate::value::Value;
use hashbrown::HashMap;
use nwscript_io::{Resref, ScriptCache, ScriptCacheEntry, ScriptReader};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

/// Supplies bytecode (and, optionally, debug-symbol bytes) for a resref
/// not yet in the cache. An embedding host implements this over its own
/// resource system (a `.bif`/override chain, a filesystem, ...) — this
/// crate only defines the seam.
pub trait ScriptLoader {
    fn load(&self, resref: &Resref) -> HostResult<(Vec<u8>, Option<Vec<u8>>)>;
}

/// Fields an embedding host populates once at startup; kept as a plain
/// struct (not a file-backed config layer — there is no filesystem
/// dependency at this layer) the way the teacher's engine-limit structs
/// are constructed.
#[derive(Clone)]
pub struct HostConfig {
    pub limits: EngineLimits,
    /// Verbosity gate forwarded to every [`Interpreter`] this host
    /// constructs (§4.4 "set_debug_level"/"is_debug_level").
    pub debug_level: u8,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            limits: EngineLimits::default(),
            debug_level: 0,
        }
    }
}

/// A pending `AssignCommand`/`DelayCommand` continuation, keyed by the id
/// handed back to script code as an opaque engine-structure handle.
struct ContinuationRecord {
    resref: Resref,
    resume_pc: u32,
    locals: Vec<Value>,
}

/// Owns everything needed to run and resume NWScript scripts: the
/// resref-keyed cache (§4.7 "Caching"), the action table, the deferred
/// queue and the next-handle counter for captured continuations.
///
/// Every mutable field lives behind a [`Mutex`] (or an atomic) and every
/// method below takes `&self`, not `&mut self` (§5 "Re-entrant calls from
/// action handlers back into scripts are supported: they nest on the
/// same thread"). An `ActionHandler` has no way to receive `&mut
/// ScriptHost` — its signature is fixed at `&[Value]`, and the trait
/// requires `Send + Sync` — so the only way for a handler to hold a
/// shared reference to the host (e.g. an `Arc<ScriptHost<E>>`, to call
/// back into `run_script` while the outer invocation is still on the
/// stack) and stay `Sync` is for every field it might touch to be
/// `Sync` itself; `RefCell`/`Cell` never are, regardless of their
/// contents, so `Mutex`/`AtomicU32` take their place here. Each lock
/// below is held only for the duration of a single statement and never
/// across a call into the interpreter or an action handler, so a
/// same-thread reentrant `run_script` never tries to re-acquire a lock
/// its own call stack already holds.
pub struct ScriptHost<E: JitEngine> {
    cache: Mutex<ScriptCache<E::Program>>,
    jit: Mutex<Option<E>>,
    actions: ActionTable,
    timers: Mutex<DeferredQueue>,
    config: HostConfig,
    continuations: Mutex<HashMap<u32, ContinuationRecord>>,
    next_continuation_id: AtomicU32,
}

impl<E: JitEngine> ScriptHost<E> {
    pub fn new(actions: ActionTable, config: HostConfig) -> Self {
        Self {
            cache: Mutex::new(ScriptCache::new()),
            jit: Mutex::new(None),
            actions,
            timers: Mutex::new(DeferredQueue::new()),
            config,
            continuations: Mutex::new(HashMap::new()),
            next_continuation_id: AtomicU32::new(0),
        }
    }

    pub fn set_jit(&self, jit: E) {
        *self.jit.lock().expect("jit mutex poisoned") = Some(jit);
    }

    /// Drops every cached script, forcing the next reference to reload
    /// and (if a JIT is configured) recompile (§R3 "clear_script_cache").
    /// Idempotent.
    pub fn clear_script_cache(&self) {
        self.cache.lock().expect("cache mutex poisoned").clear();
    }

    fn ensure_cached(&self, resref: Resref, loader: &dyn ScriptLoader) -> HostResult<()> {
        if self.cache.lock().expect("cache mutex poisoned").contains(&resref) {
            return Ok(());
        }
        let (code, symbol_bytes) = loader.load(&resref)?;
        let reader = match symbol_bytes {
            Some(bytes) => {
                let reader = ScriptReader::with_debug_symbols(resref.to_string(), code, &bytes);
                if reader.symbols().is_none() {
                    log::warn!("script {resref}: debug symbols present but malformed, discarding");
                }
                reader
            }
            None => ScriptReader::new(resref.to_string(), code),
        };
        self.cache.lock().expect("cache mutex poisoned").insert(ScriptCacheEntry {
            resref,
            reader,
            jit_program: None,
        });
        Ok(())
    }

    /// Runs `resref` from its entry point with `args`, returning whatever
    /// value (if any) it leaves on the return slot (§4.7 "run_script").
    ///
    /// A script-load failure (bad resref, unreadable bytecode) propagates
    /// as an `Err`, since there is nothing sensible to run. A failure
    /// detected once the script is actually executing — a stack fault, an
    /// exceeded guard, an aborted action — does not: it is logged and
    /// `default_return` is handed back instead (§7 "VM-detected errors...
    /// surface as a default_return_code to the top-level invoker").
    pub fn run_script(
        &self,
        resref: Resref,
        loader: &dyn ScriptLoader,
        current_self: i32,
        args: Vec<Value>,
        default_return: Option<Value>,
    ) -> HostResult<Option<Value>> {
        self.ensure_cached(resref, loader)?;
        let reader = self
            .cache
            .lock()
            .expect("cache mutex poisoned")
            .get(&resref)
            .expect("just cached")
            .reader
            .clone();

        // No bundled JIT backend ships with this crate (C6 is contract
        // only); `self.jit` is the seam a configured `E` would be
        // consulted through once it can report IR support and compile on
        // demand, so every run currently falls through to the
        // interpreter.
        let mut vm = Interpreter::new(
            reader,
            0,
            Vec::new(),
            args,
            current_self,
            self.config.limits,
            &self.actions,
        );
        vm.set_debug_level(self.config.debug_level);
        match vm.run_with_store_state(|resume_pc, locals| {
            let id = self.next_continuation_id.fetch_add(1, Ordering::Relaxed);
            self.continuations.lock().expect("continuations mutex poisoned").insert(
                id,
                ContinuationRecord {
                    resref,
                    resume_pc,
                    locals: locals.to_vec(),
                },
            );
            Value::EngineStruct {
                slot: ACTION_CONTINUATION_SLOT,
                handle: Some(id),
            }
        }) {
            Ok(result) => Ok(result),
            Err(err) => {
                log::warn!("script {resref} aborted: {err}");
                Ok(default_return)
            }
        }
    }

    /// Materializes a previously captured continuation into a
    /// [`SavedState`] suitable for wire transfer or for arming on the
    /// deferred queue (§4.7 "push_script_situation").
    pub fn push_script_situation(
        &self,
        handle: u32,
        program_state: Vec<Value>,
        current_self: i32,
    ) -> HostResult<SavedState> {
        let record = self
            .continuations
            .lock()
            .expect("continuations mutex poisoned")
            .remove(&handle)
            .ok_or_else(|| HostError::ContinuationMismatch {
                resref: format!("<unknown continuation {handle}>"),
            })?;
        Ok(SavedState {
            resref: record.resref.to_string(),
            current_self,
            program_state,
            resume_method_pc: record.resume_pc,
            resume_method_id: handle,
            resume_locals: record.locals,
        })
    }

    /// Resumes a continuation produced by [`ScriptHost::push_script_situation`]
    /// (§4.7 "pop_script_situation"/run_script_situation). `resref` of the
    /// saved state must match a script already loadable via `loader`.
    pub fn run_script_situation(
        &self,
        state: &SavedState,
        loader: &dyn ScriptLoader,
    ) -> HostResult<Option<Value>> {
        let resref = Resref::from_name(&state.resref);
        self.ensure_cached(resref, loader)?;
        let reader = self
            .cache
            .lock()
            .expect("cache mutex poisoned")
            .get(&resref)
            .expect("just cached")
            .reader
            .clone();

        let mut vm = Interpreter::resume(
            reader,
            state.resume_method_pc,
            state.program_state.clone(),
            state.resume_locals.clone(),
            state.current_self,
            self.config.limits,
            &self.actions,
        );
        vm.set_debug_level(self.config.debug_level);
        let result = vm.run_with_store_state(|resume_pc, locals| {
            let id = self.next_continuation_id.fetch_add(1, Ordering::Relaxed);
            self.continuations.lock().expect("continuations mutex poisoned").insert(
                id,
                ContinuationRecord {
                    resref,
                    resume_pc,
                    locals: locals.to_vec(),
                },
            );
            Value::EngineStruct {
                slot: ACTION_CONTINUATION_SLOT,
                handle: Some(id),
            }
        })?;
        Ok(result)
    }

    /// Arms every deferred action created since the last promotion
    /// (§4.9 "pending -> armed"). The host calls this once per game tick,
    /// after every script invocation that ran during the tick has
    /// returned, so an action scheduled during the tick cannot fire
    /// within the same tick. Returns `false` with no state change when
    /// there was nothing pending to promote (§8 "Idempotence").
    pub fn initiate_pending_deferred(&self) -> bool {
        self.timers
            .lock()
            .expect("timers mutex poisoned")
            .initiate_pending_deferred()
    }

    /// The host-side half of `DelayCommand`: takes the continuation handle
    /// a just-executed `STORE_STATE` left on the stack (§ open question
    /// "STORE_STATE continuation ABI"), wraps it into a wire [`SavedState`]
    /// and enqueues it to fire `delay_ms` from `now_ms` on the *pending*
    /// list (§4.7 "enqueue a DeferredAction with the given delay, clamped
    /// to >= 1 ms"). An embedding host's `DelayCommand` action handler
    /// calls this with the delay the script supplied.
    pub fn delay_command(
        &self,
        handle: u32,
        program_state: Vec<Value>,
        current_self: i32,
        delay_ms: i64,
        now_ms: i64,
    ) -> HostResult<u32> {
        let state = self.push_script_situation(handle, program_state, current_self)?;
        let fire_at_ms = now_ms + delay_ms.max(1);
        Ok(self
            .timers
            .lock()
            .expect("timers mutex poisoned")
            .create_timer(fire_at_ms, None, state)?)
    }

    /// The host-side half of `AssignCommand`: identical to
    /// [`ScriptHost::delay_command`] at the minimum 1 ms delay, with
    /// `target_self` (the command's subject object, not the calling
    /// script's `OBJECT_SELF`) recorded as the resumed continuation's
    /// `current_self` (§4.7 "AssignCommand... ask its VM for a saved
    /// state").
    pub fn assign_command(
        &self,
        handle: u32,
        program_state: Vec<Value>,
        target_self: i32,
        now_ms: i64,
    ) -> HostResult<u32> {
        self.delay_command(handle, program_state, target_self, 1, now_ms)
    }

    /// The driver main-loop's step (b)/(c) (§4.7 "Main loop protocol"):
    /// fires every armed action due at or before `now_ms`, resuming each
    /// continuation through `loader`, then returns the delay until the
    /// next-armed action's due time (`None` is the spec's `∞` sentinel,
    /// meaning the caller can stop looping). A continuation that fails to
    /// resume is logged and skipped rather than propagated, matching §7
    /// "Timer-callback errors are logged... they never propagate into the
    /// main loop."
    pub fn rundown_timers(&self, now_ms: i64, loader: &dyn ScriptLoader) -> Option<i64> {
        let due = self.timers.lock().expect("timers mutex poisoned").rundown(now_ms);
        for action in due {
            if let Err(err) = self.run_script_situation(&action.continuation, loader) {
                log::warn!("deferred action {} failed to resume: {err}", action.id);
            }
        }
        self.timers.lock().expect("timers mutex poisoned").next_due_in_ms(now_ms)
    }

    /// The number of deferred actions armed but not yet due, for host
    /// diagnostics and tests.
    pub fn armed_timer_count(&self) -> usize {
        self.timers.lock().expect("timers mutex poisoned").armed_count()
    }

    /// The number of deferred actions created since the last
    /// [`ScriptHost::initiate_pending_deferred`] call, for host
    /// diagnostics and tests.
    pub fn pending_timer_count(&self) -> usize {
        self.timers.lock().expect("timers mutex poisoned").pending_count()
    }

    pub fn actions(&self) -> &ActionTable {
        &self.actions
    }
}

/// The engine-structure slot reserved for action continuations captured
/// by `STORE_STATE` — distinct from the ten host-defined slots in
/// [`crate::engine_struct::EngineStructRegistry`], since a continuation
/// handle is meaningful only to `ScriptHost`, never to the embedding
/// host's own engine-structure types.
pub const ACTION_CONTINUATION_SLOT: u8 = 9;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jit::{JitEngine, JitProgram};
    use crate::opcode::OpCode;

    struct NoJit;
    struct NeverCalled;
    impl JitProgram for NeverCalled {
        fn execute(&mut self, _c: i32, _a: &[Value]) -> Result<Option<Value>, crate::error::VmError> {
            unreachable!()
        }
        fn resume(&mut self, _s: &SavedState) -> Result<Option<Value>, crate::error::VmError> {
            unreachable!()
        }
        fn save_state(&self) -> Result<SavedState, crate::error::VmError> {
            unreachable!()
        }
    }
    impl JitEngine for NoJit {
        type Program = NeverCalled;
        fn abi_version(&self) -> u32 {
            crate::jit::JIT_ABI_VERSION
        }
        fn supports(&self, _p: &crate::ir::Program) -> bool {
            false
        }
        fn generate_code(&self, _p: &crate::ir::Program) -> Result<Self::Program, crate::error::VmError> {
            unreachable!()
        }
    }

    struct StaticLoader(Vec<u8>);
    impl ScriptLoader for StaticLoader {
        fn load(&self, _resref: &Resref) -> HostResult<(Vec<u8>, Option<Vec<u8>>)> {
            Ok((self.0.clone(), None))
        }
    }

    fn const_one_retn() -> Vec<u8> {
        let mut bytes = vec![OpCode::Const as u8, crate::opcode::TypeByte::Int as u8];
        bytes.extend_from_slice(&1i32.to_be_bytes());
        bytes.push(OpCode::Retn as u8);
        bytes
    }

    #[test]
    fn run_script_caches_on_first_reference() {
        let host: ScriptHost<NoJit> = ScriptHost::new(ActionTable::new(), HostConfig::default());
        let loader = StaticLoader(const_one_retn());
        let resref = Resref::from_name("nw_s0_test");
        let r1 = host.run_script(resref, &loader, 0, vec![], None).unwrap();
        assert_eq!(r1, Some(Value::Int(1)));
        assert_eq!(host.cache.lock().expect("cache mutex poisoned").len(), 1);
        // Second call reuses the cache without re-invoking the loader.
        let r2 = host.run_script(resref, &loader, 0, vec![], None).unwrap();
        assert_eq!(r2, Some(Value::Int(1)));
    }

    #[test]
    fn clear_cache_is_idempotent() {
        let host: ScriptHost<NoJit> = ScriptHost::new(ActionTable::new(), HostConfig::default());
        host.clear_script_cache();
        host.clear_script_cache();
        assert_eq!(host.cache.lock().expect("cache mutex poisoned").len(), 0);
    }

    #[test]
    fn delay_command_fires_through_rundown_timers() {
        // STORE_STATE suspends the invocation immediately and hands back
        // an engine-struct handle standing in for the continuation a real
        // `DelayCommand(fDelay, ...)` call would capture; the trailing
        // RETN is never reached by this invocation; it belongs to the
        // resumed continuation instead.
        let mut bytecode = vec![OpCode::StoreState as u8];
        bytecode.extend_from_slice(&0i32.to_be_bytes()); // locals_size
        bytecode.extend_from_slice(&0i32.to_be_bytes()); // globals_size
        bytecode.push(OpCode::Retn as u8);
        let loader = StaticLoader(bytecode);
        let host: ScriptHost<NoJit> = ScriptHost::new(ActionTable::new(), HostConfig::default());
        let resref = Resref::from_name("nw_s0_delay");

        let result = host.run_script(resref, &loader, 0, vec![], None).unwrap();
        let handle = match result {
            Some(Value::EngineStruct { handle: Some(h), .. }) => h,
            other => panic!("expected a captured continuation handle, got {other:?}"),
        };

        host.delay_command(handle, vec![], 0, 1500, 0).unwrap();
        host.initiate_pending_deferred();
        assert_eq!(host.rundown_timers(0, &loader), Some(1500));
        assert_eq!(host.rundown_timers(1500, &loader), None);
    }
}
