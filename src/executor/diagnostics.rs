use std::collections::HashMap;
use std::fmt::Write;
use std::time::{Duration, Instant};

use crate::graph::{Ident, Plan, PlanNode};

#[derive(Debug, Clone)]
pub struct TaskExecution {
    pub start: Instant,
    pub duration: Duration,
}

/// Timing of one [`Executor::execute`](super::Executor::execute) call.
#[derive(Debug, Default)]
pub struct Diagnostics {
    /// Every task that ran, by identifier. Literal data nodes are absent.
    pub execution_times: HashMap<Ident, TaskExecution>,
}

impl Diagnostics {
    pub fn len(&self) -> usize {
        self.execution_times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.execution_times.is_empty()
    }

    /// Sum of all task durations, regardless of overlap.
    pub fn busy_time(&self) -> Duration {
        self.execution_times.values().map(|t| t.duration).sum()
    }

    /// Wall time from the first task start to the last task end.
    pub fn wall_time(&self) -> Duration {
        let start = self.execution_times.values().map(|t| t.start).min();
        let end = self
            .execution_times
            .values()
            .map(|t| t.start + t.duration)
            .max();

        match (start, end) {
            (Some(start), Some(end)) => end.duration_since(start),
            _ => Duration::ZERO,
        }
    }

    /// Renders the plan as a Mermaid diagram, color-coded by task duration.
    ///
    /// * **Green**: Fast
    /// * **Yellow**: Moderate
    /// * **Red**: Slow
    /// * **Blue**: Literal data
    pub fn render_mermaid(&self, plan: &Plan) -> String {
        let mut f = String::new();
        let _ = self.write_mermaid(&mut f, plan);
        f
    }

    fn write_mermaid(&self, f: &mut String, plan: &Plan) -> std::fmt::Result {
        writeln!(f, "graph LR")?;

        let (min_time, max_time) = self.time_range();
        let ids: HashMap<&Ident, usize> = plan.order().iter().zip(0..).collect();

        for (id, ident) in plan.order().iter().enumerate() {
            let label = mermaid_escape(&ident.to_string());

            let (extra, color) = match (plan.node(ident), self.execution_times.get(ident)) {
                (Some(PlanNode::Data(value)), _) => {
                    (mermaid_escape(value.type_name()), "#ADD8E6".to_string())
                }
                (_, Some(exec)) => {
                    let t = (exec.duration.as_secs_f64() - min_time) / (max_time - min_time);
                    (format!("{:.2?}", exec.duration), heat(t))
                }
                // never reached: the plan failed before this node ran
                (_, None) => ("skipped".to_string(), "#D3D3D3".to_string()),
            };

            writeln!(f, "    {id}[\"{label}\\n{extra}\"]")?;
            writeln!(f, "    style {id} fill:{color}")?;
        }

        for ident in plan.order() {
            for dep in plan.dependencies(ident) {
                writeln!(f, "    {} --> {}", ids[dep], ids[ident])?;
            }
        }

        Ok(())
    }

    fn time_range(&self) -> (f64, f64) {
        let mut min_time = f64::MAX;
        let mut max_time = f64::MIN;

        for t in self.execution_times.values() {
            let secs = t.duration.as_secs_f64();
            min_time = min_time.min(secs);
            max_time = max_time.max(secs);
        }

        if min_time > max_time {
            min_time = 0.0;
            max_time = 0.0;
        }

        // all tasks took the same time
        if (max_time - min_time).abs() < f64::EPSILON {
            max_time = min_time + 1.0;
        }

        (min_time, max_time)
    }
}

/// Green at 0.0, yellow at 0.5, red at 1.0.
fn heat(t: f64) -> String {
    let (r, g, b) = if t < 0.5 {
        ((255.0 * t * 2.0) as u8, 255, 0)
    } else {
        (255, (255.0 * (1.0 - (t - 0.5) * 2.0)) as u8, 0)
    };

    format!("#{r:02X}{g:02X}{b:02X}")
}

pub(crate) fn mermaid_escape(text: &str) -> String {
    text.replace('"', "#quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heat_endpoints() {
        assert_eq!(heat(0.0), "#00FF00");
        assert_eq!(heat(0.5), "#FFFF00");
        assert_eq!(heat(1.0), "#FF0000");
    }

    #[test]
    fn test_escape() {
        assert_eq!(mermaid_escape("Vec<\"x\">"), "Vec&lt;#quot;x#quot;&gt;");
    }

    #[test]
    fn test_wall_time() {
        let start = Instant::now();
        let mut diagnostics = Diagnostics::default();
        diagnostics.execution_times.insert(
            Ident::from("a"),
            TaskExecution {
                start,
                duration: Duration::from_millis(10),
            },
        );
        diagnostics.execution_times.insert(
            Ident::from("b"),
            TaskExecution {
                start: start + Duration::from_millis(5),
                duration: Duration::from_millis(10),
            },
        );

        assert_eq!(diagnostics.wall_time(), Duration::from_millis(15));
        assert_eq!(diagnostics.busy_time(), Duration::from_millis(20));
    }
}
