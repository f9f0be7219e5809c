// Quran Core - Download and caching engine for Quran apps
// Copyright (C) 2025 Quran Core contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Progress tracking with parent/child composition
//!
//! A [`Progress`] counts units (bytes for a single transfer). A parent's
//! counts are its own units plus the sum of its children, computed on every
//! read, so a batch always reports exactly the sum of its transfers.
//!
//! # Observation
//! - `snapshot()` reads both counters from one pass over the tree
//! - `on_change` listeners fire for the progress itself and for any change
//!   in its descendants

use crate::sync::lock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, Weak};

/// Listener invoked with the new state after every change
pub type ProgressListener = Arc<dyn Fn(ProgressSnapshot) + Send + Sync>;

/// Point-in-time view of a progress tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub total_unit_count: u64,
    pub completed_unit_count: u64,
}

impl ProgressSnapshot {
    /// Completed share in `0.0..=1.0` (0 when nothing is known yet)
    pub fn fraction_completed(&self) -> f64 {
        if self.total_unit_count == 0 {
            0.0
        } else {
            (self.completed_unit_count as f64 / self.total_unit_count as f64).min(1.0)
        }
    }

    pub fn is_finished(&self) -> bool {
        self.total_unit_count > 0 && self.completed_unit_count >= self.total_unit_count
    }
}

impl fmt::Display for ProgressSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} ({:.1}%)",
            self.completed_unit_count,
            self.total_unit_count,
            self.fraction_completed() * 100.0
        )
    }
}

#[derive(Default)]
struct ProgressNode {
    total: u64,
    completed: u64,
    children: Vec<Progress>,
    parents: Vec<Weak<Mutex<ProgressNode>>>,
    listeners: Vec<ProgressListener>,
}

/// Shared progress handle
///
/// Clones refer to the same counters.
#[derive(Clone, Default)]
pub struct Progress {
    node: Arc<Mutex<ProgressNode>>,
}

impl fmt::Debug for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Progress")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

impl Progress {
    pub fn new(total_unit_count: u64) -> Self {
        let progress = Self::default();
        lock(&progress.node).total = total_unit_count;
        progress
    }

    /// Total units of this progress and all descendants
    pub fn total_unit_count(&self) -> u64 {
        self.snapshot().total_unit_count
    }

    /// Completed units of this progress and all descendants
    pub fn completed_unit_count(&self) -> u64 {
        self.snapshot().completed_unit_count
    }

    pub fn fraction_completed(&self) -> f64 {
        self.snapshot().fraction_completed()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let (mut total, mut completed, children) = {
            let node = lock(&self.node);
            (node.total, node.completed, node.children.clone())
        };
        for child in children {
            let child = child.snapshot();
            total += child.total_unit_count;
            completed += child.completed_unit_count;
        }
        ProgressSnapshot {
            total_unit_count: total,
            completed_unit_count: completed,
        }
    }

    pub fn set_total(&self, total_unit_count: u64) {
        lock(&self.node).total = total_unit_count;
        self.notify();
    }

    pub fn set_completed(&self, completed_unit_count: u64) {
        lock(&self.node).completed = completed_unit_count;
        self.notify();
    }

    /// Update both own counters with a single notification
    pub fn update(&self, total_unit_count: u64, completed_unit_count: u64) {
        {
            let mut node = lock(&self.node);
            node.total = total_unit_count;
            node.completed = completed_unit_count;
        }
        self.notify();
    }

    /// Mark own units as done (a progress with no known size counts as one unit)
    pub fn finish(&self) {
        {
            let mut node = lock(&self.node);
            if node.total == 0 {
                node.total = 1;
            }
            node.completed = node.total;
        }
        self.notify();
    }

    /// Attach a child whose counts are added to this progress
    pub fn add_child(&self, child: &Progress) {
        lock(&child.node).parents.push(Arc::downgrade(&self.node));
        lock(&self.node).children.push(child.clone());
        self.notify();
    }

    pub fn children(&self) -> Vec<Progress> {
        lock(&self.node).children.clone()
    }

    /// Register a listener for changes of this progress or any descendant
    pub fn on_change<F>(&self, listener: F)
    where
        F: Fn(ProgressSnapshot) + Send + Sync + 'static,
    {
        lock(&self.node).listeners.push(Arc::new(listener));
    }

    /// Whether both handles point at the same counters
    pub fn ptr_eq(&self, other: &Progress) -> bool {
        Arc::ptr_eq(&self.node, &other.node)
    }

    fn notify(&self) {
        let (listeners, parents) = {
            let node = lock(&self.node);
            (node.listeners.clone(), node.parents.clone())
        };

        if !listeners.is_empty() {
            let snapshot = self.snapshot();
            for listener in listeners {
                listener(snapshot);
            }
        }

        for parent in parents.iter().filter_map(Weak::upgrade) {
            Progress { node: parent }.notify();
        }
    }
}
