// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

//! In-process graph runtime.
//!
//! [`SoftBackend`] executes a graph on one dedicated thread: each tick pulls
//! every feed, builds one [`CompositeFrame`] and one [`AudioMix`] from the
//! committed pad geometry and hands them to the attached sinks. Pixel and
//! sample processing is left to the sinks.

mod executor;
mod frame;
mod plan;

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::JoinHandle,
    time::Duration,
};

use anyhow::{bail, Context, Result};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tokio::sync::watch;

pub use frame::*;

use self::{
    executor::Executor,
    plan::{Plan, SharedSink},
};
use crate::{
    Backend, DrainSignal, Feed, FeedEnded, PadRef, ParamValue, ProcessingNode, Sink, Target,
    Topology,
};

/// Parameters of the [`SoftBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// frames per second
    pub framerate: u32,
    /// time without samples after which a feed counts as stalled
    pub stall_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            framerate: 30,
            stall_timeout: Duration::from_millis(500),
        }
    }
}

impl RuntimeConfig {
    #[must_use]
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.framerate.max(1)
    }
}

#[derive(Debug)]
struct Worker {
    // dropping it stops the executor
    shutdown: Sender<()>,
    exited: Receiver<()>,
    thread: JoinHandle<()>,
}

/// Default [`Backend`] running the graph on a thread of its own.
#[derive(derivative::Derivative)]
#[derivative(Debug)]
pub struct SoftBackend {
    config: RuntimeConfig,
    nodes: HashSet<String>,
    feeds: HashMap<String, Feed>,
    sinks: HashMap<String, SharedSink>,
    #[derivative(Debug = "ignore")]
    plan: watch::Sender<Arc<Plan>>,
    draining: Arc<AtomicBool>,
    #[derivative(Debug = "ignore")]
    drained: DrainSignal,
    worker: Option<Worker>,
}

impl Default for SoftBackend {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

impl SoftBackend {
    #[must_use]
    pub fn new(config: RuntimeConfig) -> Self {
        let (plan, _) = watch::channel(Arc::new(Plan::default()));
        Self {
            config,
            nodes: HashSet::new(),
            feeds: HashMap::new(),
            sinks: HashMap::new(),
            plan,
            draining: Arc::new(AtomicBool::new(false)),
            drained: DrainSignal::new(),
            worker: None,
        }
    }

    fn ensure(&self, node: &str) -> Result<()> {
        if !self.nodes.contains(node) {
            bail!("there is no node '{node}'");
        }
        Ok(())
    }

    fn stop_worker(&mut self, grace: Duration) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        drop(worker.shutdown);
        if worker.thread.thread().id() == std::thread::current().id() {
            // dropped from within a runtime callback, the loop ends on its own
            return;
        }
        match worker.exited.recv_timeout(grace) {
            Ok(()) => {
                if worker.thread.join().is_err() {
                    error!("runtime thread panicked");
                }
            }
            Err(_) => warn!("runtime thread did not stop within {grace:?}, detaching it"),
        }
    }
}

impl Backend for SoftBackend {
    fn create(&mut self, node: &ProcessingNode) -> Result<()> {
        if !self.nodes.insert(node.name().to_owned()) {
            bail!("node '{}' already exists", node.name());
        }
        Ok(())
    }

    fn remove(&mut self, node: &str) -> Result<()> {
        self.ensure(node)?;
        self.nodes.remove(node);
        if let Some(feed) = self.feeds.remove(node) {
            feed.end();
        }
        if let Some(sink) = self.sinks.remove(node) {
            exit_sink(node, &sink, self.config.stall_timeout)?;
        }
        Ok(())
    }

    fn request_pad(&mut self, node: &str, template: &str, pad: &str) -> Result<()> {
        trace!("request_pad({node}, {template}) -> {pad}");
        self.ensure(node)
    }

    fn release_pad(&mut self, node: &str, pad: &str) -> Result<()> {
        trace!("release_pad({node}.{pad})");
        self.ensure(node)
    }

    fn link(&mut self, src: &PadRef, sink: &PadRef) -> Result<()> {
        self.ensure(&src.node)?;
        self.ensure(&sink.node)
    }

    fn unlink(&mut self, src: &PadRef, sink: &PadRef) -> Result<()> {
        trace!("unlink({src}, {sink})");
        Ok(())
    }

    fn set_parameter(&mut self, target: &Target, name: &str, value: &ParamValue) -> Result<()> {
        trace!("set_parameter({target}, {name}={value})");
        match target {
            Target::Node(node) => self.ensure(node),
            Target::Pad(pad) => self.ensure(&pad.node),
        }
    }

    fn attach_feed(&mut self, node: &str, feed: Feed) -> Result<()> {
        self.ensure(node)?;
        if let Some(previous) = self.feeds.insert(node.to_owned(), feed) {
            debug!(
                "replaced feed of track '{}' at '{node}'",
                previous.track().id
            );
        }
        Ok(())
    }

    fn attach_sink(&mut self, node: &str, mut sink: Box<dyn Sink>) -> Result<()> {
        self.ensure(node)?;
        if self.worker.is_some() {
            sink.on_play().context("unable to set sink to playing")?;
        }
        self.sinks.insert(node.to_owned(), Arc::new(Mutex::new(sink)));
        Ok(())
    }

    fn commit(&mut self, topology: &Topology) -> Result<()> {
        let plan = Plan::derive(topology, &self.feeds, &self.sinks);
        trace!(
            "commit: {} feed(s), {} video input(s), {} audio input(s)",
            plan.feeds.len(),
            plan.video.len(),
            plan.audio.len()
        );
        self.plan.send_replace(Arc::new(plan));
        Ok(())
    }

    fn activate(&mut self, feed_ended: FeedEnded) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }
        for (name, sink) in &self.sinks {
            sink.lock()
                .on_play()
                .with_context(|| format!("unable to set sink '{name}' to playing"))?;
        }

        let (shutdown, shutdown_receiver) = crossbeam_channel::bounded::<()>(0);
        let (exited_sender, exited) = crossbeam_channel::bounded::<()>(1);
        let executor = Executor {
            plan: self.plan.subscribe(),
            shutdown: shutdown_receiver,
            draining: self.draining.clone(),
            drained: self.drained.clone(),
            feed_ended,
            frame_interval: self.config.frame_interval(),
            stall_timeout: self.config.stall_timeout,
        };
        let thread = std::thread::Builder::new()
            .name("compositor-runtime".to_owned())
            .spawn(move || {
                executor.run();
                let _ = exited_sender.send(());
            })
            .context("unable to spawn runtime thread")?;

        self.worker = Some(Worker {
            shutdown,
            exited,
            thread,
        });
        Ok(())
    }

    fn drain(&mut self) -> Result<()> {
        if self.draining.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!("draining {} feed(s)", self.feeds.len());
        for feed in self.feeds.values() {
            feed.end();
        }
        if self.worker.is_none() {
            self.drained.notify();
        }
        Ok(())
    }

    fn drained(&self) -> DrainSignal {
        self.drained.clone()
    }

    fn teardown(&mut self, grace: Duration) -> Result<()> {
        debug!("tearing down runtime");
        self.stop_worker(grace);
        for feed in self.feeds.values() {
            feed.end();
        }
        self.plan.send_replace(Arc::new(Plan::default()));

        let mut result = Ok(());
        for (name, sink) in self.sinks.drain() {
            if let Err(error) = exit_sink(&name, &sink, grace) {
                error!("{error:#}");
                result = Err(error);
            }
        }
        self.feeds.clear();
        self.nodes.clear();
        result
    }
}

/// Call `on_exit` on a sink unless the runtime still holds it after `timeout`.
fn exit_sink(name: &str, sink: &SharedSink, timeout: Duration) -> Result<()> {
    let Some(mut sink) = sink.try_lock_for(timeout) else {
        warn!("sink '{name}' is still busy after {timeout:?}, skipping it");
        bail!("sink '{name}' did not become free within {timeout:?}");
    };
    sink.on_exit()
        .with_context(|| format!("unable to exit sink '{name}'"))
}

impl Drop for SoftBackend {
    fn drop(&mut self) {
        if self.worker.is_some() {
            debug!("dropping active runtime");
            self.stop_worker(self.config.stall_timeout);
        }
    }
}
