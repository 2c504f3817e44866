/*
 * pool.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Corriere, an embedded HTTP engine.
 *
 * Corriere is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Corriere is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Corriere.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Fixed-size scoped worker pool over an mpsc job channel. Workers drain the
//! channel and exit when the producer drops its sender; the scope joins them
//! before `serve` returns.

use std::io;
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

/// Run `producer` with a job sender while `count` workers consume jobs with
/// `handler`. Returns after the producer has finished and every queued job
/// has been handled.
pub(crate) fn serve<T, H, P, R>(count: usize, handler: H, producer: P) -> io::Result<R>
where
    T: Send,
    H: Fn(T) + Sync,
    P: FnOnce(mpsc::Sender<T>) -> R,
{
    thread::scope(|scope| {
        let (tx, rx) = mpsc::channel::<T>();
        let rx = Arc::new(Mutex::new(rx));
        for i in 0..count {
            let rx = Arc::clone(&rx);
            let handler = &handler;
            thread::Builder::new()
                .name(format!("corriere-worker-{}", i))
                .spawn_scoped(scope, move || loop {
                    // Idle workers queue on the mutex; recv blocks until a
                    // job arrives or the sender is gone.
                    let job = rx
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .recv();
                    match job {
                        Ok(job) => handler(job),
                        Err(_) => break,
                    }
                })?;
        }
        Ok(producer(tx))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn all_jobs_are_handled_before_return() {
        let handled = AtomicUsize::new(0);
        let result = serve(
            4,
            |n: usize| {
                thread::sleep(Duration::from_millis(n as u64 % 3));
                handled.fetch_add(1, Ordering::SeqCst);
            },
            |tx| {
                for n in 0..50 {
                    tx.send(n).unwrap();
                }
                "done"
            },
        )
        .unwrap();
        assert_eq!(result, "done");
        assert_eq!(handled.load(Ordering::SeqCst), 50);
    }

    #[test]
    fn workers_are_named() {
        let named = AtomicUsize::new(0);
        serve(
            2,
            |_: ()| {
                let name = thread::current().name().unwrap_or("").to_string();
                if name.starts_with("corriere-worker-") {
                    named.fetch_add(1, Ordering::SeqCst);
                }
            },
            |tx| {
                tx.send(()).unwrap();
                tx.send(()).unwrap();
            },
        )
        .unwrap();
        assert_eq!(named.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn producer_result_propagates() {
        let value = serve(1, |_: u8| {}, |_tx| 1234u32).unwrap();
        assert_eq!(value, 1234);
    }
}
