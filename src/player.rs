//! Serial background rendering queue.
//!
//! [`Player`] moves a [`Decoder`] onto a dedicated worker thread and feeds
//! it render jobs one at a time, so all reads from the source and all canvas
//! mutation stay on a single context. Results are published, in request
//! order, into a shared slot the calling context polls with
//! [`output`](Player::output) or awaits with [`wait_output`](Player::wait_output).

use log::debug;
use std::io::{Read, Seek};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use crate::compositor::RgbaCanvas;
use crate::decoder::Decoder;
use crate::error::DecodingError;

/// A published render result. Errors are shared since the underlying
/// error type is not clonable.
pub type PlayerOutput = Result<Arc<RgbaCanvas>, Arc<DecodingError>>;

enum Job {
    RenderNext,
    Reset,
    Shutdown,
}

struct Published {
    output: Option<PlayerOutput>,
    current_index: usize,
    first_pass_done: bool,
}

struct Shared {
    state: Mutex<Published>,
    ready: Condvar,
}

/// Drives a decoder from a serial worker thread.
pub struct Player {
    shared: Arc<Shared>,
    jobs: Sender<Job>,
    worker: Option<JoinHandle<()>>,
}

impl Player {
    /// Moves `decoder` onto a new worker thread. The frame 0 output the
    /// decoder rendered during construction is published immediately.
    pub fn spawn<R>(decoder: Decoder<R>) -> Player
    where
        R: Read + Seek + Send + 'static,
    {
        let shared = Arc::new(Shared {
            state: Mutex::new(Published {
                output: decoder.output().map(|image| Ok(image.clone())),
                current_index: decoder.current_index(),
                first_pass_done: decoder.is_first_pass_done(),
            }),
            ready: Condvar::new(),
        });
        let (jobs, queue) = mpsc::channel();
        let worker = thread::spawn({
            let shared = shared.clone();
            move || worker_loop(decoder, shared, queue)
        });
        Player {
            shared,
            jobs,
            worker: Some(worker),
        }
    }

    /// Clears the published output and enqueues one render.
    ///
    /// The next frame is composed on the worker and published when done;
    /// monotonic progression is preserved because jobs run one at a time.
    pub fn render_next(&self) {
        self.shared.state.lock().unwrap().output = None;
        let _ = self.jobs.send(Job::RenderNext);
    }

    /// Clears the published output and enqueues a rewind to frame 0.
    /// Serialized behind in-flight jobs; frame 0 is re-published when done.
    pub fn reset(&self) {
        self.shared.state.lock().unwrap().output = None;
        let _ = self.jobs.send(Job::Reset);
    }

    /// The currently published output, or `None` while a render is pending.
    pub fn output(&self) -> Option<PlayerOutput> {
        self.shared.state.lock().unwrap().output.clone()
    }

    /// Blocks until an output is published, then returns it.
    pub fn wait_output(&self) -> PlayerOutput {
        let mut state = self.shared.state.lock().unwrap();
        loop {
            if let Some(output) = state.output.clone() {
                return output;
            }
            state = self.shared.ready.wait(state).unwrap();
        }
    }

    /// Index of the frame the published output shows.
    pub fn current_index(&self) -> usize {
        self.shared.state.lock().unwrap().current_index
    }

    /// Whether every frame's metadata has been assembled.
    pub fn is_first_pass_done(&self) -> bool {
        self.shared.state.lock().unwrap().first_pass_done
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        let _ = self.jobs.send(Job::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn worker_loop<R: Read + Seek>(
    mut decoder: Decoder<R>,
    shared: Arc<Shared>,
    queue: Receiver<Job>,
) {
    while let Ok(job) = queue.recv() {
        let output = match job {
            Job::Shutdown => break,
            Job::RenderNext => Some(decoder.render_next_sync().map_err(Arc::new)),
            Job::Reset => match decoder.reset() {
                Ok(()) => decoder.output().map(|image| Ok(image.clone())),
                Err(err) => Some(Err(Arc::new(err))),
            },
        };
        let mut state = shared.state.lock().unwrap();
        state.output = output;
        state.current_index = decoder.current_index();
        state.first_pass_done = decoder.is_first_pass_done();
        shared.ready.notify_all();
    }
    debug!("render queue shut down");
}
