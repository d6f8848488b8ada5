//! The audio cycle runner (spec.md §4.4), driven once per
//! `driver.wait()` return.

use std::time::{Duration, Instant};

use crate::client::{ClientKind, CycleState, Dispatch};
use crate::engine::lifecycle::{self, ErrorOutcome};
use crate::engine::{events, Engine};

#[derive(Debug, Default)]
pub struct CycleReport {
    pub skipped: bool,
    pub process_errors: u32,
    pub xrun: bool,
}

impl Engine {
    /// One pass of the audio thread's loop body. Called with `nframes`
    /// and `delayed_usecs` from `driver.wait()`.
    pub fn run_cycle(&self, nframes: u32, delayed_usecs: i64) -> crate::error::EngineResult<CycleReport> {
        self.watchdog.stamp();
        let cycle_start = Instant::now();

        let spare_usecs = self.cpu_load.lock().spare_usecs();
        if self.config.realtime && delayed_usecs > spare_usecs {
            self.handle_excessive_delay()?;
            return Ok(CycleReport {
                skipped: true,
                xrun: true,
                ..Default::default()
            });
        }
        self.excessive_delays.store(0, std::sync::atomic::Ordering::Relaxed);

        let prior = self.frame_timer.read();
        let now_usecs = prior.stamp_usecs + self.period_usecs();
        self.frame_timer.advance(prior.frames + nframes as u64, now_usecs);

        let Some(mut graph) = self.graph.try_lock() else {
            let mut driver = self.driver.lock();
            driver.null_cycle(nframes)?;
            return Ok(CycleReport {
                skipped: true,
                ..Default::default()
            });
        };
        let mut graph_guard = graph;
        let graph = &mut *graph_guard;

        {
            let mut driver = self.driver.lock();
            driver.read(nframes)?;
        }

        let mut report = CycleReport::default();
        let mut restart_needed = false;

        let n = graph.clients.len();
        let timeout_msecs = if self.config.realtime {
            (self.period_usecs() / 1000).max(1) as u32
        } else {
            self.config.client_timeout_msecs
        };

        // `timed_out` is a consecutive-miss counter and must survive
        // across cycles (spec.md §8 scenario 2: zombify on the second
        // straight miss) — only a successful finish clears it, below.
        for client in graph.clients.iter_mut() {
            client.cycle_state = CycleState::NotTriggered;
            client.nframes = nframes;
        }

        let mut idx = 0;
        // Counts external subgraphs in list order, matching
        // `graph::subgraph::rechain()`'s own `n` so the fd this cycle
        // signals/waits on is the one the last resort actually wired up.
        let mut subgraph_ordinal: u32 = 0;
        'dispatch: while idx < n {
            let skip_external_run = {
                let client = &graph.clients[idx];
                client.dead || !client.active
            };
            if skip_external_run {
                idx += 1;
                continue;
            }

            let kind = graph.clients[idx].kind;
            match kind {
                ClientKind::Internal | ClientKind::Driver => {
                    let (process, arg) = match &graph.clients[idx].dispatch {
                        Dispatch::Internal { process, arg, .. } | Dispatch::Driver { process, arg, .. } => {
                            (*process, *arg)
                        }
                        _ => unreachable!("kind matched Internal/Driver"),
                    };
                    graph.clients[idx].cycle_state = CycleState::Running;
                    let rc = process(nframes, arg);
                    if rc != 0 {
                        lifecycle::account_process_error(&mut graph.clients[idx]);
                        report.process_errors += 1;
                        restart_needed = true;
                        break 'dispatch;
                    }
                    graph.clients[idx].cycle_state = CycleState::Finished;
                    idx += 1;
                }
                ClientKind::External => {
                    let client = &mut graph.clients[idx];
                    client.cycle_state = CycleState::Triggered;
                    client.signalled_at = Some(Instant::now());
                    client.awake_at = None;
                    client.finished_at = None;

                    let fifo_index = subgraph_ordinal;
                    subgraph_ordinal += 1;
                    let mut fifos = self.fifos.lock();
                    let signalled = fifos.signal(fifo_index).is_ok();
                    if signalled {
                        // Simplification: the server cannot observe the
                        // remote client's own wake timestamp; treat a
                        // successful signal write as evidence it woke.
                        graph.clients[idx].awake_at = Some(Instant::now());
                    }

                    let timeout = Duration::from_millis(
                        graph.clients[idx].timeout_override_msecs.unwrap_or(timeout_msecs) as u64,
                    );
                    let finished = signalled && fifos.wait(fifo_index, timeout).unwrap_or(false);
                    drop(fifos);

                    if finished {
                        graph.clients[idx].finished_at = Some(Instant::now());
                        graph.clients[idx].cycle_state = CycleState::Finished;
                        graph.clients[idx].timed_out = 0;
                    } else {
                        // Leave `cycle_state` at `Triggered` and
                        // `error`/`timed_out` untouched here: the
                        // post-process pass below is the single place
                        // that accounts a miss, so one slow cycle isn't
                        // double-counted.
                        report.process_errors += 1;
                    }

                    // Skip the rest of this subgraph: the engine only
                    // waits for the tail (spec.md §4.4, §5).
                    idx += 1;
                    while idx < n && graph.clients[idx].kind == ClientKind::External {
                        idx += 1;
                    }
                }
            }
        }

        if report.process_errors == 0 {
            let mut driver = self.driver.lock();
            driver.write(nframes)?;
        } else {
            let mut driver = self.driver.lock();
            let _ = driver.stop();
        }

        // Post-process.
        let pending = graph.pending_time;
        crate::engine::transport::promote(&mut graph.current_time, &pending);

        for i in 0..n {
            let still_running = matches!(
                graph.clients[i].kind,
                ClientKind::External
            ) && matches!(graph.clients[i].cycle_state, CycleState::Triggered);
            if still_running {
                graph.clients[i].timed_out += 1;
                // Second consecutive miss within this accounting window
                // crosses the threshold (spec.md §8 scenario 2).
                if graph.clients[i].timed_out >= 2 {
                    lifecycle::account_process_error(&mut graph.clients[i]);
                }
            }
        }

        let to_resolve: Vec<(crate::ids::ClientId, ErrorOutcome)> = graph
            .clients
            .iter_mut()
            .filter_map(|c| match lifecycle::classify_error(c) {
                ErrorOutcome::None => None,
                outcome => Some((c.id, outcome)),
            })
            .collect();

        for (id, outcome) in to_resolve {
            let notes = match outcome {
                ErrorOutcome::Zombify => lifecycle::zombify(
                    &mut graph.clients,
                    &mut graph.ports,
                    &mut graph.port_private,
                    &self.port_types,
                    &mut graph.timebase_client,
                    &mut graph.current_time,
                    &mut graph.pending_time,
                    id,
                ),
                _ => lifecycle::remove(
                    &mut graph.clients,
                    &mut graph.ports,
                    &mut graph.port_private,
                    &self.port_types,
                    &mut graph.timebase_client,
                    &mut graph.current_time,
                    &mut graph.pending_time,
                    id,
                ),
            };
            if let Ok(notes) = notes {
                for (client_id, event) in notes {
                    if let Some(c) = graph.clients.iter_mut().find(|c| c.id == client_id) {
                        let _ = events::deliver(c, event);
                    }
                }
            }
        }

        self.cpu_load.lock().record(cycle_start.elapsed());
        drop(graph_guard);

        if restart_needed {
            let mut driver = self.driver.lock();
            let _ = driver.start();
        }

        Ok(report)
    }

    fn handle_excessive_delay(&self) -> crate::error::EngineResult<()> {
        {
            let mut driver = self.driver.lock();
            let _ = driver.stop();
        }
        if let Some(mut graph) = self.graph.try_lock() {
            let event = events::xrun();
            events::broadcast(&mut graph.clients, event);
        }
        {
            let mut driver = self.driver.lock();
            driver.start()?;
        }

        let count = self
            .excessive_delays
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
            + 1;
        if count >= self.config.max_excessive_delays {
            return Err(crate::error::EngineError::DriverAborted(count));
        }
        Ok(())
    }
}
