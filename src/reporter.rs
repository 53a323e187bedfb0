use crate::events::Event;

/// Reporter aggregates events and produces human or JSON output.
pub struct Reporter {
    events: Vec<Event>,
    json_mode: bool,
}

impl Reporter {
    pub fn new(json_mode: bool) -> Self {
        Self {
            events: Vec::new(),
            json_mode,
        }
    }

    pub fn record(&mut self, event: Event) {
        if self.json_mode {
            // Emit JSON line to stdout
            if let Ok(line) = serde_json::to_string(&event) {
                println!("{}", line);
            }
        } else if let Some(line) = human_line(&event) {
            println!("{}", line);
        }
        self.events.push(event);
    }

    pub fn summary(&self) -> String {
        let count = |pred: fn(&Event) -> bool| self.events.iter().filter(|e| pred(e)).count();
        let completed = count(|e| matches!(e, Event::OpCompleted { .. }));
        let failed = count(|e| matches!(e, Event::OpFailed { .. } | Event::ValidationFailed { .. }));
        let reversed = count(|e| matches!(e, Event::OpReversed { .. }));
        let unreversed = count(|e| matches!(e, Event::ReversalFailed { .. }));
        format!(
            "{completed} applied, {failed} failed, {reversed} reversed, {unreversed} not reversed"
        )
    }
}

fn human_line(event: &Event) -> Option<String> {
    let line = match event {
        Event::ValidationFailed {
            index,
            destination,
            reason,
        } => format!("invalid #{index} {}: {reason}", destination.display()),
        Event::OpPlanned { index, kind, src, dst } => match src {
            Some(src) => format!("plan #{index} {kind} {} -> {}", src.display(), dst.display()),
            None => format!("plan #{index} {kind} {}", dst.display()),
        },
        Event::OpFailed { index, error } => format!("failed #{index}: {error}"),
        Event::TxnCommitted { transaction_id } => format!("committed {transaction_id}"),
        Event::TxnFailed {
            transaction_id,
            error,
        } => format!("transaction {transaction_id} failed: {error}"),
        Event::ReversalFailed { index, error } => format!("not reversed #{index}: {error}"),
        Event::RollbackCompleted {
            transaction_id,
            failures,
        } => format!("rolled back {transaction_id} ({failures} failure(s))"),
        _ => return None,
    };
    Some(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_counts() {
        let mut reporter = Reporter::new(false);
        reporter.record(Event::OpCompleted {
            index: 0,
            bytes_copied: 0,
            dst: "/lib/a.mkv".into(),
        });
        reporter.record(Event::OpFailed {
            index: 1,
            error: "x".into(),
        });
        reporter.record(Event::OpReversed {
            index: 0,
            outcome: "restored".into(),
        });
        assert_eq!(reporter.summary(), "1 applied, 1 failed, 1 reversed, 0 not reversed");
    }
}
