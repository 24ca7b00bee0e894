//! Per-request timing and response bookkeeping on the client.
//!
//! Stats are diagnostic. Nothing in here fails the request it describes:
//! bad timer sequences record zero and reconciliation problems leave
//! zeroed results behind.

use fleetrpc_ddl::Ddl;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{self, Write as _};
use std::sync::Arc;

/// Source of the current time in fractional Unix seconds.
pub trait Clock: Send + Sync {
    fn now(&self) -> f64;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        chrono::Utc::now().timestamp_millis() as f64 / 1000.0
    }
}

/// Timer events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Timer {
    Start,
    End,
    /// Anything else. Recording it zeroes the timing.
    Unknown(String),
}

impl From<&str> for Timer {
    fn from(event: &str) -> Self {
        match event {
            "start" => Timer::Start,
            "end" => Timer::End,
            other => Timer::Unknown(other.to_string()),
        }
    }
}

/// The stage in which an aggregate function failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFailureKind {
    Startup,
    Create,
    ProcessResult,
    Summarize,
}

impl AggregateFailureKind {
    fn message(self, name: &str) -> String {
        match self {
            AggregateFailureKind::Startup => "exception raised while processing startup hook".to_string(),
            AggregateFailureKind::Create => format!("unspecified output '{}' for the action", name),
            AggregateFailureKind::ProcessResult => "exception raised while processing result data".to_string(),
            AggregateFailureKind::Summarize => "exception raised while summarizing".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateFailure {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: AggregateFailureKind,
}

/// The rendered result of one aggregate function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub action: String,
    /// The output the function summarised.
    pub output: String,
    /// Rendered summary text, possibly multi-line.
    pub report: String,
}

/// Statistics gathered by the client side of a request.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClientStats {
    pub noresponsefrom: Vec<String>,
    pub unexpectedresponsefrom: Vec<String>,
    pub responses: u64,
    pub starttime: f64,
    pub blocktime: f64,
    pub totaltime: f64,
    pub discoverytime: f64,
}

/// Per-request counters.
#[derive(Clone, Serialize)]
pub struct Stats {
    pub discoverytime: f64,
    pub blocktime: f64,
    pub totaltime: f64,
    pub okcount: u64,
    pub failcount: u64,
    pub responses: u64,
    pub discovered: usize,
    pub discovered_nodes: Vec<String>,
    /// Nodes that replied. `None` if the list was lost; the next response
    /// starts a new one.
    #[serde(skip)]
    pub responsesfrom: Option<Vec<String>>,
    pub noresponsefrom: Vec<String>,
    pub unexpectedresponsefrom: Vec<String>,
    pub aggregate_summary: Vec<AggregateResult>,
    pub aggregate_failures: Vec<AggregateFailure>,
    pub starttime: f64,
    pub requestid: Option<String>,
    #[serde(skip)]
    discovery_start: Option<f64>,
    #[serde(skip)]
    block_start: Option<f64>,
    #[serde(skip)]
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stats")
            .field("requestid", &self.requestid)
            .field("discovered", &self.discovered)
            .field("responses", &self.responses)
            .field("okcount", &self.okcount)
            .field("failcount", &self.failcount)
            .field("totaltime", &self.totaltime)
            .finish()
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl Stats {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let starttime = clock.now();
        Self {
            discoverytime: 0.0,
            blocktime: 0.0,
            totaltime: 0.0,
            okcount: 0,
            failcount: 0,
            responses: 0,
            discovered: 0,
            discovered_nodes: Vec::new(),
            responsesfrom: Some(Vec::new()),
            noresponsefrom: Vec::new(),
            unexpectedresponsefrom: Vec::new(),
            aggregate_summary: Vec::new(),
            aggregate_failures: Vec::new(),
            starttime,
            requestid: None,
            discovery_start: None,
            block_start: None,
            clock,
        }
    }

    /// Clears every counter and restarts the clock.
    pub fn reset(&mut self) {
        *self = Self::with_clock(Arc::clone(&self.clock));
    }

    pub fn ok(&mut self) {
        self.okcount += 1;
    }

    pub fn fail(&mut self) {
        self.failcount += 1;
    }

    pub fn time_discovery(&mut self, event: impl Into<Timer>) {
        let now = self.clock.now();
        self.discoverytime = match event.into() {
            Timer::Start => {
                self.discovery_start = Some(now);
                return;
            }
            Timer::End => self.discovery_start.map_or(0.0, |start| now - start),
            Timer::Unknown(_) => 0.0,
        };
    }

    pub fn time_block_execution(&mut self, event: impl Into<Timer>) {
        let now = self.clock.now();
        self.blocktime = match event.into() {
            Timer::Start => {
                self.block_start = Some(now);
                return;
            }
            Timer::End => self.block_start.map_or(0.0, |start| now - start),
            Timer::Unknown(_) => 0.0,
        };
    }

    /// Records the nodes expected to respond.
    pub fn discovered_agents(&mut self, nodes: Vec<String>) {
        self.discovered = nodes.len();
        self.discovered_nodes = nodes;
    }

    pub fn node_responded(&mut self, node: &str) {
        match self.responsesfrom.as_mut() {
            Some(nodes) => nodes.push(node.to_string()),
            None => self.responsesfrom = Some(vec![node.to_string()]),
        }
        self.responses += 1;
    }

    /// Computes the total time and the expected vs. actual responders.
    ///
    /// On any reconciliation failure the partitions are emptied, the total
    /// time is zero and a warning is logged.
    pub fn finish_request(&mut self) {
        match self.reconcile() {
            Ok((totaltime, noresponsefrom, unexpectedresponsefrom)) => {
                self.totaltime = totaltime;
                self.noresponsefrom = noresponsefrom;
                self.unexpectedresponsefrom = unexpectedresponsefrom;
            }
            Err(reason) => {
                tracing::warn!(requestid = ?self.requestid, reason, "failed to calculate request stats");
                self.totaltime = 0.0;
                self.noresponsefrom = Vec::new();
                self.unexpectedresponsefrom = Vec::new();
            }
        }
    }

    fn reconcile(&self) -> Result<(f64, Vec<String>, Vec<String>), &'static str> {
        let responded = self.responsesfrom.as_ref().ok_or("response list is missing")?;
        let totaltime = self.discoverytime + self.blocktime;
        if !totaltime.is_finite() {
            return Err("timings are not finite");
        }

        let noresponsefrom = self
            .discovered_nodes
            .iter()
            .filter(|node| !responded.contains(node))
            .cloned()
            .collect();
        let unexpectedresponsefrom = responded
            .iter()
            .filter(|node| !self.discovered_nodes.contains(node))
            .cloned()
            .collect();

        Ok((totaltime, noresponsefrom, unexpectedresponsefrom))
    }

    /// Takes over statistics gathered elsewhere. An already recorded
    /// discovery time is kept.
    pub fn client_stats(&mut self, stats: ClientStats) {
        self.noresponsefrom = stats.noresponsefrom;
        self.unexpectedresponsefrom = stats.unexpectedresponsefrom;
        self.responses = stats.responses;
        self.starttime = stats.starttime;
        self.blocktime = stats.blocktime;
        self.totaltime = stats.totaltime;
        if self.discoverytime == 0.0 {
            self.discoverytime = stats.discoverytime;
        }
    }

    /// Nodes that were discovered but did not reply, or an empty string.
    pub fn no_response_report(&self) -> String {
        host_report("No response from:", &self.noresponsefrom)
    }

    /// Nodes that replied without being discovered, or an empty string.
    pub fn unexpected_response_report(&self) -> String {
        host_report("Unexpected response from:", &self.unexpectedresponsefrom)
    }

    /// Renders aggregate summaries and failures. Output names are shown by
    /// their `display_as` label when `ddl` declares one.
    pub fn text_for_aggregates(&self, ddl: Option<&Ddl>) -> String {
        let mut text = String::new();

        for aggregate in &self.aggregate_summary {
            let display_as = ddl
                .and_then(|ddl| ddl.action_interface(&aggregate.action))
                .and_then(|spec| spec.output.get(&aggregate.output))
                .map_or(aggregate.output.as_str(), |output| output.display_as.as_str());

            let _ = writeln!(text, "Summary of {}:\n", display_as);
            if aggregate.report.is_empty() {
                let _ = writeln!(text, "     No aggregate summary could be computed");
            } else {
                for line in aggregate.report.lines() {
                    let _ = writeln!(text, "   {}", line);
                }
            }
            text.push('\n');
        }

        for failure in &self.aggregate_failures {
            let _ = writeln!(text, "Summary of {}:\n", failure.name);
            let _ = writeln!(
                text,
                "    Could not compute summary - {}\n",
                failure.kind.message(&failure.name)
            );
        }

        text
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Hosts in sorted, padded columns.
fn host_report(title: &str, hosts: &[String]) -> String {
    if hosts.is_empty() {
        return String::new();
    }

    let mut sorted: Vec<&str> = hosts.iter().map(String::as_str).collect();
    sorted.sort_unstable();

    let width = sorted.iter().map(|h| h.len()).max().unwrap_or(0).max(30);
    let columns = (90 / width).max(1);

    let mut text = format!("\n{}\n\n", title);
    for row in sorted.chunks(columns) {
        text.push_str("   ");
        for host in row {
            let _ = write!(text, " {:<width$}", host, width = width);
        }
        text.push('\n');
    }
    text
}
