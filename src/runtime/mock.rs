//! Scripted in-memory runtime for testing.
//!
//! Records every call and lets tests decide which images fail to pull,
//! create or start, and what each exec session prints.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{OutputChunk, OutputStream, RuntimeClient, RuntimeError};

/// What an exec session does once attached.
#[derive(Debug, Clone, Default)]
pub(crate) struct MockExec {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
    /// Emit output, then never finish.
    pub hang: bool,
    /// Emit output, then break the stream while the process keeps running.
    pub detached: bool,
}

impl MockExec {
    /// Exits 0 after printing `stdout`.
    pub fn ok(stdout: &str) -> Self {
        Self {
            stdout: stdout.to_string(),
            ..Default::default()
        }
    }

    /// Exits with `exit_code` after printing to both streams.
    pub fn fail(exit_code: i64, stdout: &str, stderr: &str) -> Self {
        Self {
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            exit_code,
            ..Default::default()
        }
    }

    /// Prints `stdout` and then runs forever.
    pub fn hang(stdout: &str) -> Self {
        Self {
            stdout: stdout.to_string(),
            hang: true,
            ..Default::default()
        }
    }

    /// Prints `stdout`, then the attach connection drops and the process runs on.
    pub fn detached(stdout: &str) -> Self {
        Self {
            stdout: stdout.to_string(),
            detached: true,
            ..Default::default()
        }
    }
}

type Script = Arc<dyn Fn(&[String]) -> MockExec + Send + Sync>;

#[derive(Default)]
struct MockState {
    next_id: usize,
    /// Created containers and whether they are running.
    containers: HashMap<String, bool>,
    execs: HashMap<String, MockExec>,
    pulled: Vec<String>,
    stopped: Vec<String>,
    removed: Vec<String>,
    exec_commands: Vec<Vec<String>>,
}

/// In-memory [`RuntimeClient`].
#[derive(Clone)]
pub(crate) struct MockRuntime {
    state: Arc<Mutex<MockState>>,
    failing_pulls: Arc<HashSet<String>>,
    failing_creates: Arc<HashSet<String>>,
    failing_starts: Arc<HashSet<String>>,
    failing_removes: Arc<AtomicBool>,
    failing_inspect: Arc<AtomicBool>,
    stop_delay: Arc<Mutex<Duration>>,
    remove_delay: Arc<Mutex<Duration>>,
    script: Script,
    create_calls: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
}

impl MockRuntime {
    /// A runtime where everything succeeds and exec echoes the last argv element.
    pub fn new() -> Self {
        Self {
            state: Arc::default(),
            failing_pulls: Arc::default(),
            failing_creates: Arc::default(),
            failing_starts: Arc::default(),
            failing_removes: Arc::default(),
            failing_inspect: Arc::default(),
            stop_delay: Arc::default(),
            remove_delay: Arc::default(),
            script: Arc::new(|cmd: &[String]| MockExec::ok(cmd.last().map_or("", String::as_str))),
            create_calls: Arc::default(),
            closed: Arc::default(),
        }
    }

    /// Pulls of these images fail.
    pub fn with_failing_pulls(mut self, images: &[&str]) -> Self {
        self.failing_pulls = Arc::new(images.iter().map(ToString::to_string).collect());
        self
    }

    /// Container creation from these images fails.
    pub fn with_failing_creates(mut self, images: &[&str]) -> Self {
        self.failing_creates = Arc::new(images.iter().map(ToString::to_string).collect());
        self
    }

    /// Containers from these images are created but fail to start.
    pub fn with_failing_starts(mut self, images: &[&str]) -> Self {
        self.failing_starts = Arc::new(images.iter().map(ToString::to_string).collect());
        self
    }

    /// Every exec session behaves as `script` decides from its argv.
    pub fn with_script<F>(mut self, script: F) -> Self
    where
        F: Fn(&[String]) -> MockExec + Send + Sync + 'static,
    {
        self.script = Arc::new(script);
        self
    }

    /// Container removal always fails.
    pub fn with_failing_removes(self) -> Self {
        self.failing_removes.store(true, Ordering::SeqCst);
        self
    }

    /// Exec inspection always fails.
    pub fn with_failing_inspect(self) -> Self {
        self.failing_inspect.store(true, Ordering::SeqCst);
        self
    }

    /// Each stop sleeps for `delay` first.
    pub fn with_stop_delay(self, delay: Duration) -> Self {
        *self.stop_delay.lock().unwrap() = delay;
        self
    }

    /// Each removal sleeps for `delay` first.
    pub fn with_remove_delay(self, delay: Duration) -> Self {
        *self.remove_delay.lock().unwrap() = delay;
        self
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn pulled(&self) -> Vec<String> {
        self.state.lock().unwrap().pulled.clone()
    }

    pub fn stopped(&self) -> Vec<String> {
        self.state.lock().unwrap().stopped.clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.state.lock().unwrap().removed.clone()
    }

    pub fn exec_commands(&self) -> Vec<Vec<String>> {
        self.state.lock().unwrap().exec_commands.clone()
    }

    /// Ids of containers that exist and are running.
    pub fn running(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut ids: Vec<String> = state
            .containers
            .iter()
            .filter(|(_, running)| **running)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn check_open(&self) -> Result<(), RuntimeError> {
        if self.is_closed() {
            Err(RuntimeError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RuntimeClient for MockRuntime {
    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        self.check_open()?;
        if self.failing_pulls.contains(image) {
            return Err(RuntimeError::image_not_found(image));
        }
        self.state.lock().unwrap().pulled.push(image.to_string());
        Ok(())
    }

    async fn create_container(
        &self,
        name: &str,
        image: &str,
        _command: &[String],
    ) -> Result<String, RuntimeError> {
        self.check_open()?;
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_creates.contains(image) {
            return Err(RuntimeError::container_failed("create", format!("no such image: {image}")));
        }
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = format!("{image}#{}#{name}", state.next_id);
        state.containers.insert(id.clone(), false);
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.check_open()?;
        let image = id.split('#').next().unwrap_or_default();
        if self.failing_starts.contains(image) {
            return Err(RuntimeError::container_failed("start", "OCI runtime create failed"));
        }
        match self.state.lock().unwrap().containers.get_mut(id) {
            Some(running) => {
                *running = true;
                Ok(())
            }
            None => Err(RuntimeError::container_failed("start", "no such container")),
        }
    }

    async fn stop_container(&self, id: &str, _grace: Duration) -> Result<(), RuntimeError> {
        self.check_open()?;
        let delay = *self.stop_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock().unwrap();
        state.stopped.push(id.to_string());
        match state.containers.get_mut(id) {
            Some(running) => {
                *running = false;
                Ok(())
            }
            None => Err(RuntimeError::container_failed("stop", "no such container")),
        }
    }

    async fn remove_container(&self, id: &str, _force: bool) -> Result<(), RuntimeError> {
        self.check_open()?;
        let delay = *self.remove_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.failing_removes.load(Ordering::SeqCst) {
            return Err(RuntimeError::container_failed("remove", "device or resource busy"));
        }
        let mut state = self.state.lock().unwrap();
        state.removed.push(id.to_string());
        state.containers.remove(id);
        Ok(())
    }

    async fn exec_create(&self, id: &str, command: Vec<String>) -> Result<String, RuntimeError> {
        self.check_open()?;
        let behaviour = (self.script)(&command);
        let mut state = self.state.lock().unwrap();
        if state.containers.get(id) != Some(&true) {
            return Err(RuntimeError::exec_failed("create", "container is not running"));
        }
        state.next_id += 1;
        let exec_id = format!("exec-{}", state.next_id);
        state.execs.insert(exec_id.clone(), behaviour);
        state.exec_commands.push(command);
        Ok(exec_id)
    }

    async fn exec_attach(&self, exec_id: &str) -> Result<OutputStream, RuntimeError> {
        self.check_open()?;
        let behaviour = self
            .state
            .lock()
            .unwrap()
            .execs
            .get(exec_id)
            .cloned()
            .ok_or_else(|| RuntimeError::exec_failed("attach", "no such exec"))?;

        let mut frames = Vec::new();
        if !behaviour.stdout.is_empty() {
            frames.push(Ok(OutputChunk::Stdout(Bytes::from(behaviour.stdout))));
        }
        if !behaviour.stderr.is_empty() {
            frames.push(Ok(OutputChunk::Stderr(Bytes::from(behaviour.stderr))));
        }

        if behaviour.detached {
            frames.push(Err(RuntimeError::exec_failed("stream", "connection reset by peer")));
        }

        let frames = stream::iter(frames);
        if behaviour.hang {
            Ok(frames.chain(stream::pending()).boxed())
        } else {
            Ok(frames.boxed())
        }
    }

    async fn exec_inspect(&self, exec_id: &str) -> Result<Option<i64>, RuntimeError> {
        self.check_open()?;
        if self.failing_inspect.load(Ordering::SeqCst) {
            return Err(RuntimeError::exec_failed("inspect", "no such exec"));
        }
        let state = self.state.lock().unwrap();
        match state.execs.get(exec_id) {
            Some(exec) if exec.hang || exec.detached => Ok(None),
            Some(exec) => Ok(Some(exec.exit_code)),
            None => Err(RuntimeError::exec_failed("inspect", "no such exec")),
        }
    }

    async fn close(&self) -> Result<(), RuntimeError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(RuntimeError::Closed);
        }
        Ok(())
    }
}
