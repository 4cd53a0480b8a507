//! Broadcast fan-out of one channel to a fixed set of named branches.
//!
//! Every item read from the input is sent to every branch. The sends for one
//! item are issued concurrently, so a stalled branch does not keep the item
//! from the others, and the next item is only read once every branch accepted
//! the current one. Each branch therefore sees the items in input order.

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};

/// Branch feeding the rotating snapshot log
pub const STORAGE_BRANCH: &str = "storage";
/// Branch feeding the live streaming subscribers
pub const STREAMING_BRANCH: &str = "streaming";

struct Branch<T> {
    name: String,
    tx: mpsc::Sender<T>,
}

/// Replicates an input channel to named output branches
pub struct FanOut<T> {
    buffer: usize,
    branches: Vec<Branch<T>>,
}

impl<T> FanOut<T>
where
    T: Clone + Send + 'static,
{
    /// Creates a fan-out whose branch channels hold `buffer` items each
    pub fn new(buffer: usize) -> Self {
        Self { buffer: buffer.max(1), branches: Vec::new() }
    }

    /// Registers a branch and returns its receiving end
    pub fn branch(&mut self, name: impl Into<String>) -> Result<mpsc::Receiver<T>> {
        let name = name.into();
        if self.branches.iter().any(|branch| branch.name == name) {
            return Err(Error::DuplicateBranch(name));
        }
        let (tx, rx) = mpsc::channel(self.buffer);
        self.branches.push(Branch { name, tx });
        Ok(rx)
    }

    pub fn branch_names(&self) -> Vec<&str> {
        self.branches.iter().map(|branch| branch.name.as_str()).collect()
    }

    /// Forwards `input` until it closes, then closes every branch.
    ///
    /// A branch whose receiver was dropped is removed; the others keep
    /// receiving.
    pub async fn run(self, mut input: mpsc::Receiver<T>) {
        let mut branches = self.branches;

        while let Some(item) = input.recv().await {
            let results = join_all(branches.iter().map(|branch| branch.tx.send(item.clone()))).await;
            let closed: Vec<bool> = results.iter().map(|result| result.is_err()).collect();

            let mut index = 0;
            branches.retain(|branch| {
                let keep = !closed[index];
                index += 1;
                if !keep {
                    tracing::warn!(branch = %branch.name, "fan-out branch receiver dropped, removing branch");
                }
                keep
            });
        }

        for branch in branches {
            tracing::debug!(branch = %branch.name, "input closed, closing fan-out branch");
        }
        tracing::info!("fan-out stopped");
    }

    pub fn spawn(self, input: mpsc::Receiver<T>) -> JoinHandle<()> {
        tokio::spawn(self.run(input))
    }
}
