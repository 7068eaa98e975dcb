use std::collections::HashMap;
use std::path::Path;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use anyhow::{bail, Result};
use serde_json::Value;
use tether_config::BridgeConfig;

use crate::dispatch::ResultProcessor;
use crate::event::{BridgeMessage, ScopedMessage};
use crate::executor::{
    Executor, ExecutorLink, ExecutorRegistry, CALL_FUNCTION, CONFIG_GLOBAL, FLUSHED_QUEUE,
    INVOKE_CALLBACK,
};
use crate::handle::{BridgeHandle, ControlHandle, Generation};
use crate::provider::{discover_all, ModuleProvider, ProviderContext};
use crate::registry::ModuleRegistry;
use crate::source::{FileSourceProvider, SourceLink, SourceProvider};
use crate::state::{BridgeState, Observable};
use crate::surface::{ErrorSurface, LogErrorSurface};

/// What to do with the response document of an outstanding engine call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Continuation {
    /// Dispatch the returned batch.
    Process,
    /// Dispatch the returned batch, then mark the bridge ready.
    MarkReady,
}

/// Live state of the current generation.
struct Session {
    handle: BridgeHandle,
    link: ExecutorLink,
    executor: Box<dyn Executor>,
    pending: HashMap<u64, Continuation>,
    script_done: bool,
}

/// The bridge lifecycle.
///
/// Owns the module registry, the executor of the current generation and the
/// inbox every asynchronous result is delivered through. All state
/// transitions and module invocations happen on the thread that drives
/// [`pump`](Bridge::pump), [`process_pending`](Bridge::process_pending) or
/// [`run`](Bridge::run).
pub struct Bridge {
    config: BridgeConfig,
    executors: ExecutorRegistry,
    providers: Vec<Box<dyn ModuleProvider>>,
    source: Box<dyn SourceProvider>,
    surface: Box<dyn ErrorSurface>,
    tx: Sender<BridgeMessage>,
    rx: Receiver<BridgeMessage>,
    generation: Generation,
    registry: ModuleRegistry,
    session: Option<Session>,
    next_token: u64,
    error_surfaced: bool,
    shut_down: bool,
    state: Observable<BridgeState>,
    ready: Observable<bool>,
}

impl Bridge {
    pub fn new(config: BridgeConfig) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            config,
            executors: ExecutorRegistry::with_defaults(),
            providers: Vec::new(),
            source: Box::new(FileSourceProvider::new()),
            surface: Box::new(LogErrorSurface::new()),
            tx,
            rx,
            generation: 0,
            registry: ModuleRegistry::new(0),
            session: None,
            next_token: 1,
            error_surfaced: false,
            shut_down: false,
            state: Observable::new(BridgeState::Uninitialized),
            ready: Observable::new(false),
        }
    }

    pub fn with_executors(mut self, executors: ExecutorRegistry) -> Self {
        self.executors = executors;
        self
    }

    pub fn with_source(mut self, source: impl SourceProvider + 'static) -> Self {
        self.source = Box::new(source);
        self
    }

    pub fn with_error_surface(mut self, surface: impl ErrorSurface + 'static) -> Self {
        self.surface = Box::new(surface);
        self
    }

    pub fn with_provider(mut self, provider: impl ModuleProvider + 'static) -> Self {
        self.add_provider(provider);
        self
    }

    /// Providers are consulted in the order they were added.
    pub fn add_provider(&mut self, provider: impl ModuleProvider + 'static) {
        self.providers.push(Box::new(provider));
    }

    pub fn on_ready_changed(&mut self, mut observer: impl FnMut(bool) + 'static) {
        self.ready.subscribe(move |ready| observer(*ready));
    }

    pub fn on_state_changed(&mut self, mut observer: impl FnMut(BridgeState) + 'static) {
        self.state.subscribe(move |state| observer(*state));
    }

    pub fn control_handle(&self) -> ControlHandle {
        ControlHandle::new(self.tx.clone())
    }

    /// Handle bound to the current generation, if one is running.
    pub fn handle(&self) -> Option<BridgeHandle> {
        self.session.as_ref().map(|s| s.handle.clone())
    }

    pub fn ready(&self) -> bool {
        *self.ready.get()
    }

    pub fn state(&self) -> BridgeState {
        *self.state.get()
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    /// Names of the modules registered for the current generation.
    pub fn modules(&self) -> Vec<&str> {
        self.registry.names()
    }

    pub fn bundle_url(&self) -> Option<&str> {
        self.config.bundle_url.as_deref()
    }

    pub fn plugins_path(&self) -> &Path {
        &self.config.plugins_path
    }

    pub fn executor_name(&self) -> &str {
        &self.config.executor_name
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    /// Start the first generation.
    pub fn init(&mut self) -> Result<()> {
        if self.state() != BridgeState::Uninitialized {
            bail!("bridge already initialized (state {})", self.state());
        }
        self.start_generation();
        Ok(())
    }

    /// Tear down the current generation and start a new one. `ready` drops to
    /// false before anything is torn down. Returns `false` when the bridge is
    /// not in a state that can reload.
    pub fn reload(&mut self) -> bool {
        if self.shut_down || !self.state().can_reload() {
            tracing::warn!(state = %self.state(), "reload ignored");
            return false;
        }
        tracing::info!(generation = self.generation, "reloading bridge");
        self.ready.set(false);
        self.state.set(BridgeState::Reloading);
        self.teardown();
        self.start_generation();
        true
    }

    /// Stop the executor and release all modules. The bridge cannot be
    /// restarted afterwards.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.ready.set(false);
        self.teardown();
        self.shut_down = true;
        tracing::info!(generation = self.generation, "bridge shut down");
    }

    /// Wait up to `timeout` for a message, then handle everything queued.
    /// Returns the number of messages handled.
    pub fn pump(&mut self, timeout: Duration) -> usize {
        if self.shut_down {
            return 0;
        }
        match self.rx.recv_timeout(timeout) {
            Ok(message) => {
                self.handle_message(message);
                1 + self.process_pending()
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => 0,
        }
    }

    /// Handle every message already queued, without blocking.
    pub fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        while !self.shut_down {
            let Ok(message) = self.rx.try_recv() else {
                break;
            };
            self.handle_message(message);
            handled += 1;
        }
        handled
    }

    /// Run the owner loop until a shutdown is requested.
    pub fn run(&mut self) {
        while !self.shut_down {
            match self.rx.recv() {
                Ok(message) => self.handle_message(message),
                Err(_) => break,
            }
        }
    }

    fn start_generation(&mut self) {
        self.generation += 1;
        self.error_surfaced = false;
        self.registry.reset(self.generation);
        self.state.set(BridgeState::Initializing);

        let handle = BridgeHandle::new(self.generation, self.tx.clone());
        let link = ExecutorLink::new(handle.clone());
        let mut executor =
            match self
                .executors
                .create(&self.config.executor_name, link.clone(), &self.config)
            {
                Ok(executor) => executor,
                Err(err) => {
                    self.fail_generation(format!("could not construct executor: {err:#}"));
                    return;
                }
            };
        tracing::info!(
            executor = executor.name(),
            generation = self.generation,
            "executor constructed"
        );
        if let Err(err) = executor.init() {
            executor.shutdown();
            self.fail_generation(format!("executor {} failed to start: {err:#}", executor.name()));
            return;
        }

        let ctx = ProviderContext {
            handle: handle.clone(),
            config: &self.config,
        };
        let modules = discover_all(&mut self.providers, &ctx);
        let registered = self.registry.register(modules);

        executor.inject_json(CONFIG_GLOBAL, self.registry.serialize_config().to_value());
        tracing::info!(
            modules = registered,
            generation = self.generation,
            "modules registered and injected"
        );

        self.session = Some(Session {
            handle: handle.clone(),
            link,
            executor,
            pending: HashMap::new(),
            script_done: false,
        });
        self.state.set(BridgeState::SourceLoading);
        self.source
            .load(self.config.bundle_url.as_deref(), SourceLink::new(handle));
    }

    fn teardown(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.executor.shutdown();
        }
        self.registry.clear();
    }

    fn handle_message(&mut self, message: BridgeMessage) {
        match message {
            BridgeMessage::Reload => {
                self.reload();
            }
            BridgeMessage::Shutdown => self.shutdown(),
            BridgeMessage::Scoped(generation, _) if generation != self.generation => {
                tracing::debug!(
                    generation,
                    current = self.generation,
                    "dropping message from a torn-down generation"
                );
            }
            BridgeMessage::Scoped(_, message) => self.handle_scoped(message),
        }
    }

    fn handle_scoped(&mut self, message: ScopedMessage) {
        if self.state() == BridgeState::Failed {
            if let ScopedMessage::ReportError { message, .. } = &message {
                tracing::warn!(report = %message, "error reported after failure");
            } else {
                tracing::debug!(?message, "generation failed; message dropped");
            }
            return;
        }

        match message {
            ScopedMessage::SourceReady { code } => self.on_source_ready(code),
            ScopedMessage::SourceFailed { reason } => {
                self.fail_generation(format!("could not load bundle: {reason}"));
            }
            ScopedMessage::ScriptDone => self.on_script_done(),
            ScopedMessage::CallResult { token, document } => self.on_call_result(token, document),
            ScopedMessage::CallFailed { token, reason } => self.on_call_failed(token, &reason),
            ScopedMessage::ExecutorFailed { reason } => {
                self.fail_generation(format!("executor failed: {reason}"));
            }
            ScopedMessage::EnqueueJsCall {
                module,
                method,
                args,
            } => {
                let params = vec![Value::String(module), Value::String(method), Value::Array(args)];
                self.call_engine(CALL_FUNCTION, params, Continuation::Process);
            }
            ScopedMessage::InvokeCallback { callback, args } => {
                let params = vec![Value::from(callback.0), Value::Array(args)];
                self.call_engine(INVOKE_CALLBACK, params, Continuation::Process);
            }
            ScopedMessage::ReportError { message, fatal } => {
                if fatal {
                    tracing::error!(report = %message, generation = self.generation, "fatal script error");
                    self.surface_error(&message);
                } else {
                    tracing::warn!(report = %message, generation = self.generation, "script error");
                }
            }
        }
    }

    fn on_source_ready(&mut self, code: String) {
        if self.state() != BridgeState::SourceLoading {
            tracing::warn!(state = %self.state(), "unexpected bundle delivery ignored");
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let url = self.config.bundle_url.clone().unwrap_or_default();
        tracing::info!(%url, bytes = code.len(), "running application script");
        self.state.set(BridgeState::Running);
        session.executor.execute_application_script(code, &url);
    }

    fn on_script_done(&mut self) {
        let state = self.state();
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if state != BridgeState::Running || session.script_done {
            tracing::debug!(%state, "duplicate script completion ignored");
            return;
        }
        session.script_done = true;
        self.call_engine(FLUSHED_QUEUE, Vec::new(), Continuation::MarkReady);
    }

    fn on_call_result(&mut self, token: u64, document: Value) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let Some(continuation) = session.pending.remove(&token) else {
            tracing::debug!(token, "reply for unknown call ignored");
            return;
        };
        let handle = session.handle.clone();
        let outcome = ResultProcessor::process(&self.registry, &handle, &document);

        if continuation == Continuation::MarkReady {
            match outcome {
                Ok(_) => {
                    self.state.set(BridgeState::Ready);
                    self.ready.set(true);
                    tracing::info!(generation = self.generation, "bridge ready");
                }
                Err(err) => {
                    tracing::error!(
                        error = %err,
                        generation = self.generation,
                        "initial queue flush could not be decoded; bridge not ready"
                    );
                }
            }
        }
    }

    fn on_call_failed(&mut self, token: u64, reason: &str) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        match session.pending.remove(&token) {
            Some(Continuation::MarkReady) => tracing::error!(
                %reason,
                generation = self.generation,
                "initial queue flush failed in the engine; bridge not ready"
            ),
            Some(Continuation::Process) => tracing::warn!(
                %reason,
                generation = self.generation,
                "engine call failed; nothing dispatched"
            ),
            None => tracing::debug!(token, "failure for unknown call ignored"),
        }
    }

    fn call_engine(&mut self, method: &str, args: Vec<Value>, continuation: Continuation) {
        let state = self.state();
        let running = matches!(state, BridgeState::Running | BridgeState::Ready);
        let Some(session) = self.session.as_mut().filter(|_| running) else {
            tracing::debug!(method, %state, "engine not running; call dropped");
            return;
        };
        let token = self.next_token;
        self.next_token += 1;
        session.pending.insert(token, continuation);
        let reply = session.link.reply(token);
        session.executor.execute_js_call(method, args, reply);
    }

    fn fail_generation(&mut self, reason: String) {
        tracing::error!(%reason, generation = self.generation, "bridge generation failed");
        self.ready.set(false);
        self.state.set(BridgeState::Failed);
        if let Some(mut session) = self.session.take() {
            session.executor.shutdown();
        }
        self.surface_error(&reason);
    }

    fn surface_error(&mut self, message: &str) {
        if self.error_surfaced {
            return;
        }
        self.error_surfaced = true;
        self.surface.show_error(message);
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.executor.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::{Args, CallbackId};
    use crate::executor::CallReply;
    use crate::module::{MethodSpec, NativeModule};
    use crate::provider::FnProvider;
    use serde_json::json;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    type Shared<T> = Rc<RefCell<T>>;

    /// Everything the fake engine saw, across generations.
    #[derive(Default)]
    struct EngineLog {
        events: Vec<String>,
        calls: Vec<(Generation, String, Vec<Value>)>,
        injected: Vec<(Generation, Value)>,
        responses: VecDeque<Value>,
        fail_next_call: Option<String>,
        hold_script: bool,
    }

    struct FakeExecutor {
        link: ExecutorLink,
        log: Shared<EngineLog>,
    }

    impl Executor for FakeExecutor {
        fn name(&self) -> &str {
            "Fake"
        }
        fn init(&mut self) -> Result<()> {
            Ok(())
        }
        fn inject_json(&mut self, _name: &str, value: Value) {
            self.log
                .borrow_mut()
                .injected
                .push((self.link.generation(), value));
        }
        fn execute_application_script(&mut self, code: String, _source_url: &str) {
            let mut log = self.log.borrow_mut();
            log.events.push(format!("script:{code}"));
            if !log.hold_script {
                self.link.script_done();
            }
        }
        fn execute_js_call(&mut self, method: &str, args: Vec<Value>, reply: CallReply) {
            let mut log = self.log.borrow_mut();
            log.calls
                .push((self.link.generation(), method.to_string(), args));
            if let Some(reason) = log.fail_next_call.take() {
                reply.fail(reason);
                return;
            }
            let response = log.responses.pop_front().unwrap_or(Value::Null);
            reply.deliver(response);
        }
        fn shutdown(&mut self) {
            self.log
                .borrow_mut()
                .events
                .push(format!("shutdown:{}", self.link.generation()));
        }
    }

    struct Echo {
        log: Shared<Vec<(String, Vec<Value>)>>,
    }

    impl NativeModule for Echo {
        fn name(&self) -> &str {
            "Echo"
        }
        fn methods(&self) -> Vec<MethodSpec> {
            vec![
                MethodSpec::new("ping", 0),
                MethodSpec::new("notify", 1),
                MethodSpec::callback("say", 2),
            ]
        }
        fn invoke(&mut self, method: &str, bridge: &BridgeHandle, args: Args) -> Result<()> {
            if method == "say" {
                let cb = args.callback(1)?;
                bridge.invoke_callback(cb, vec![args.value(0)?.clone()]);
            }
            self.log
                .borrow_mut()
                .push((method.to_string(), args.into_inner()));
            Ok(())
        }
    }

    struct FixedSource(std::result::Result<&'static str, &'static str>);

    impl SourceProvider for FixedSource {
        fn load(&mut self, _url: Option<&str>, link: SourceLink) {
            match self.0 {
                Ok(code) => link.ready(code.to_string()),
                Err(reason) => link.failed(reason),
            };
        }
    }

    struct Harness {
        bridge: Bridge,
        engine: Shared<EngineLog>,
        invoked: Shared<Vec<(String, Vec<Value>)>>,
        shown: Shared<Vec<String>>,
    }

    fn harness(source: FixedSource) -> Harness {
        let engine: Shared<EngineLog> = Rc::default();
        let invoked: Shared<Vec<(String, Vec<Value>)>> = Rc::default();
        let shown: Shared<Vec<String>> = Rc::default();

        let factory_log = Rc::clone(&engine);
        let executors = ExecutorRegistry::new(
            "Fake",
            Box::new(move |link, _config| {
                Ok(Box::new(FakeExecutor {
                    link,
                    log: Rc::clone(&factory_log),
                }) as Box<dyn Executor>)
            }),
        );
        let provider_log = Rc::clone(&invoked);
        let surface_log = Rc::clone(&shown);
        let config = BridgeConfig {
            bundle_url: Some("file:///app/index.bundle".into()),
            executor_name: "Fake".into(),
            ..BridgeConfig::default()
        };
        let bridge = Bridge::new(config)
            .with_executors(executors)
            .with_source(source)
            .with_error_surface(move |msg: &str| surface_log.borrow_mut().push(msg.to_string()))
            .with_provider(FnProvider::new("test", move |_| {
                Ok(vec![Box::new(Echo {
                    log: Rc::clone(&provider_log),
                }) as Box<dyn NativeModule>])
            }));
        Harness {
            bridge,
            engine,
            invoked,
            shown,
        }
    }

    fn ok_source() -> FixedSource {
        FixedSource(Ok("app()"))
    }

    #[test]
    fn becomes_ready_only_after_initial_flush() {
        let mut h = harness(ok_source());
        let states: Shared<Vec<BridgeState>> = Rc::default();
        {
            let states = Rc::clone(&states);
            h.bridge.on_state_changed(move |s| states.borrow_mut().push(s));
        }
        h.bridge.init().unwrap();
        assert!(!h.bridge.ready());
        assert_eq!(h.bridge.state(), BridgeState::SourceLoading);

        h.bridge.process_pending();
        assert!(h.bridge.ready());
        assert_eq!(
            *states.borrow(),
            vec![
                BridgeState::Initializing,
                BridgeState::SourceLoading,
                BridgeState::Running,
                BridgeState::Ready,
            ]
        );
        let engine = h.engine.borrow();
        assert_eq!(engine.calls.len(), 1);
        assert_eq!(engine.calls[0].1, FLUSHED_QUEUE);
        assert_eq!(engine.events, vec!["script:app()".to_string()]);
    }

    #[test]
    fn injected_config_matches_registry() {
        let mut h = harness(ok_source());
        h.bridge.init().unwrap();
        let engine = h.engine.borrow();
        let (generation, config) = &engine.injected[0];
        assert_eq!(*generation, 1);
        assert_eq!(config["remoteModuleConfig"]["Echo"]["moduleID"], json!(0));
        assert_eq!(
            config["remoteModuleConfig"]["Echo"]["methods"]["notify"]["methodID"],
            json!(1)
        );
        assert_eq!(h.bridge.modules(), vec!["Echo"]);
    }

    #[test]
    fn flush_batch_is_dispatched_before_ready() {
        let mut h = harness(ok_source());
        h.engine
            .borrow_mut()
            .responses
            .push_back(json!([[0, 7], [1, 0], [["hello"], []]]));
        let seen_ready_during_call: Shared<Vec<bool>> = Rc::default();
        {
            let seen = Rc::clone(&seen_ready_during_call);
            let invoked = Rc::clone(&h.invoked);
            h.bridge
                .on_ready_changed(move |ready| seen.borrow_mut().push(ready && !invoked.borrow().is_empty()));
        }
        h.bridge.init().unwrap();
        h.bridge.process_pending();

        assert_eq!(
            *h.invoked.borrow(),
            vec![("notify".to_string(), vec![json!("hello")])]
        );
        assert_eq!(*seen_ready_during_call.borrow(), vec![true]);
    }

    #[test]
    fn undecodable_flush_leaves_bridge_not_ready() {
        let mut h = harness(ok_source());
        h.engine.borrow_mut().responses.push_back(json!({"queue": []}));
        h.bridge.init().unwrap();
        h.bridge.process_pending();
        assert!(!h.bridge.ready());
        assert_eq!(h.bridge.state(), BridgeState::Running);
        assert!(h.shown.borrow().is_empty());
    }

    #[test]
    fn engine_error_on_flush_leaves_bridge_not_ready() {
        let mut h = harness(ok_source());
        h.engine.borrow_mut().fail_next_call = Some("ReferenceError: __fbBatchedBridge".into());
        h.bridge.init().unwrap();
        h.bridge.process_pending();
        assert!(!h.bridge.ready());
        assert_eq!(h.bridge.state(), BridgeState::Running);
        assert!(h.shown.borrow().is_empty());
        assert!(h.invoked.borrow().is_empty());
    }

    #[test]
    fn duplicate_script_completion_flushes_once() {
        let mut h = harness(ok_source());
        h.engine.borrow_mut().hold_script = true;
        h.bridge.init().unwrap();
        h.bridge.process_pending();
        assert_eq!(h.bridge.state(), BridgeState::Running);

        let link = ExecutorLink::new(h.bridge.handle().unwrap());
        link.script_done();
        link.script_done();
        h.bridge.process_pending();
        assert!(h.bridge.ready());
        assert_eq!(h.engine.borrow().calls.len(), 1);
    }

    #[test]
    fn reload_drops_ready_before_teardown() {
        let mut h = harness(ok_source());
        {
            let engine = Rc::clone(&h.engine);
            h.bridge
                .on_ready_changed(move |ready| engine.borrow_mut().events.push(format!("ready:{ready}")));
        }
        h.bridge.init().unwrap();
        h.bridge.process_pending();
        assert!(h.bridge.ready());

        assert!(h.bridge.reload());
        assert_eq!(h.bridge.generation(), 2);
        assert!(!h.bridge.ready());
        h.bridge.process_pending();
        assert!(h.bridge.ready());

        assert_eq!(
            h.engine.borrow().events,
            vec![
                "script:app()".to_string(),
                "ready:true".to_string(),
                "ready:false".to_string(),
                "shutdown:1".to_string(),
                "script:app()".to_string(),
                "ready:true".to_string(),
            ]
        );
        // IDs are reassigned from zero for the new generation.
        assert_eq!(h.bridge.registry().get("Echo").unwrap().id(), 0);
        assert_eq!(h.bridge.registry().generation(), 2);
    }

    #[test]
    fn messages_from_old_generation_are_dropped() {
        let mut h = harness(ok_source());
        h.bridge.init().unwrap();
        h.bridge.process_pending();
        let stale = h.bridge.handle().unwrap();
        let stale_link = ExecutorLink::new(stale.clone());

        h.bridge.reload();
        h.bridge.process_pending();
        let calls_before = h.engine.borrow().calls.len();

        stale.enqueue_js_call("AppRegistry", "runApplication", vec![]);
        stale_link.fail("old engine died");
        stale_link.reply(1).deliver(json!([[0], [0], [[]]]));
        h.bridge.process_pending();

        assert_eq!(h.engine.borrow().calls.len(), calls_before);
        assert!(h.invoked.borrow().is_empty());
        assert!(h.bridge.ready());
        assert!(h.shown.borrow().is_empty());
    }

    #[test]
    fn source_failure_is_terminal_and_surfaced_once() {
        let mut h = harness(FixedSource(Err("404")));
        h.bridge.init().unwrap();
        let handle = h.bridge.handle().unwrap();
        h.bridge.process_pending();

        assert_eq!(h.bridge.state(), BridgeState::Failed);
        assert!(!h.bridge.ready());
        assert_eq!(h.shown.borrow().len(), 1);
        assert!(h.shown.borrow()[0].contains("404"));

        handle.report_error("boom", true);
        h.bridge.process_pending();
        assert_eq!(h.shown.borrow().len(), 1);
        assert!(h.engine.borrow().events.iter().any(|e| e == "shutdown:1"));
    }

    #[test]
    fn failed_generation_can_be_reloaded() {
        let mut h = harness(FixedSource(Err("offline")));
        h.bridge.init().unwrap();
        h.bridge.process_pending();
        assert_eq!(h.bridge.state(), BridgeState::Failed);

        assert!(h.bridge.reload());
        h.bridge.process_pending();
        assert_eq!(h.bridge.state(), BridgeState::Failed);
        assert_eq!(h.shown.borrow().len(), 2);
    }

    #[test]
    fn module_callbacks_and_js_calls_reach_engine() {
        let mut h = harness(ok_source());
        h.engine
            .borrow_mut()
            .responses
            .push_back(json!([[0], [2], [["hi", 5]]]));
        h.bridge.init().unwrap();
        h.bridge.process_pending();

        let handle = h.bridge.handle().unwrap();
        handle.enqueue_js_call("AppRegistry", "runApplication", vec![json!("main")]);
        h.bridge.process_pending();

        let engine = h.engine.borrow();
        let methods: Vec<&str> = engine.calls.iter().map(|(_, m, _)| m.as_str()).collect();
        assert_eq!(methods, vec![FLUSHED_QUEUE, INVOKE_CALLBACK, CALL_FUNCTION]);
        assert_eq!(engine.calls[1].2, vec![json!(5), json!(["hi"])]);
        assert_eq!(
            engine.calls[2].2,
            vec![json!("AppRegistry"), json!("runApplication"), json!(["main"])]
        );
        assert_eq!(CallbackId(5).to_string(), "cb#5");
    }

    #[test]
    fn fatal_report_reaches_surface_once() {
        let mut h = harness(ok_source());
        h.bridge.init().unwrap();
        h.bridge.process_pending();
        let handle = h.bridge.handle().unwrap();
        handle.report_error("warning only", false);
        handle.report_error("TypeError: x is undefined", true);
        handle.report_error("second fatal", true);
        h.bridge.process_pending();
        assert_eq!(*h.shown.borrow(), vec!["TypeError: x is undefined".to_string()]);
        assert!(h.bridge.ready());
    }

    #[test]
    fn unknown_executor_falls_back_to_default() {
        let mut h = harness(ok_source());
        h.bridge.config.executor_name = "JavaScriptCore".into();
        h.bridge.init().unwrap();
        h.bridge.process_pending();
        assert!(h.bridge.ready());
    }

    #[test]
    fn control_handle_drives_reload_and_shutdown() {
        let mut h = harness(ok_source());
        h.bridge.init().unwrap();
        let control = h.bridge.control_handle();
        control.reload();
        control.shutdown();
        h.bridge.run();

        assert!(h.bridge.is_shut_down());
        assert!(!h.bridge.ready());
        assert!(h.bridge.modules().is_empty());
        assert_eq!(h.bridge.generation(), 2);
        assert!(!h.bridge.reload());
    }

    #[test]
    fn init_twice_is_an_error() {
        let mut h = harness(ok_source());
        h.bridge.init().unwrap();
        assert!(h.bridge.init().is_err());
    }
}
