// src/exec/process_tree.rs

//! Signal delivery to a whole process tree.
//!
//! The interpreter forks helpers of its own, so pausing or stopping only the
//! direct child would leave work running. The tree is re-read from the OS on
//! every call.

use std::collections::{HashMap, VecDeque};

use sysinfo::{Pid, ProcessesToUpdate, Signal, System};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeSignal {
    Suspend,
    Resume,
    Kill,
}

impl TreeSignal {
    fn as_sysinfo(self) -> Signal {
        match self {
            TreeSignal::Suspend => Signal::Stop,
            TreeSignal::Resume => Signal::Continue,
            TreeSignal::Kill => Signal::Kill,
        }
    }
}

/// `root` followed by all of its descendants, breadth first.
///
/// `edges` holds `(child, parent)` pairs.
pub fn descendants(root: u32, edges: &[(u32, u32)]) -> Vec<u32> {
    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    for (child, parent) in edges {
        if child != parent {
            children.entry(*parent).or_default().push(*child);
        }
    }

    let mut order = vec![root];
    let mut queue = VecDeque::from([root]);
    while let Some(pid) = queue.pop_front() {
        if let Some(kids) = children.get(&pid) {
            for kid in kids {
                if !order.contains(kid) {
                    order.push(*kid);
                    queue.push_back(*kid);
                }
            }
        }
    }
    order
}

/// Deliver `signal` to `root` and every descendant.
///
/// Suspend goes top-down so parents cannot spawn new children mid-way; the
/// other signals go bottom-up. Processes that already exited are skipped.
/// Returns how many processes accepted the signal.
pub fn signal_tree(root: u32, signal: TreeSignal) -> usize {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);

    let edges: Vec<(u32, u32)> = system
        .processes()
        .iter()
        .filter_map(|(pid, process)| process.parent().map(|parent| (pid.as_u32(), parent.as_u32())))
        .collect();

    let mut pids = descendants(root, &edges);
    if signal != TreeSignal::Suspend {
        pids.reverse();
    }

    let mut delivered = 0;
    for pid in pids {
        let Some(process) = system.process(Pid::from_u32(pid)) else {
            debug!(pid, "process already gone; skipping");
            continue;
        };
        match process.kill_with(signal.as_sysinfo()) {
            Some(true) => delivered += 1,
            Some(false) => debug!(pid, ?signal, "signal not delivered (process exited?)"),
            None => {
                warn!(pid, ?signal, "signal not supported on this platform");
                break;
            }
        }
    }

    debug!(root, ?signal, delivered, "signalled process tree");
    delivered
}
