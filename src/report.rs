//! Results table rendering. Purely a presentation sink: the engine hands
//! over the ordered results and never reads anything back.
use crate::engine::ScenarioResult;

pub trait Reporter {
    fn report(&self, results: &[ScenarioResult]);
}

pub struct ConsoleReporter;

impl Reporter for ConsoleReporter {
    fn report(&self, results: &[ScenarioResult]) {
        print!("{}", render_results(results));
    }
}

pub(crate) fn render_results(results: &[ScenarioResult]) -> String {
    let mut out = String::new();
    if results.is_empty() {
        out.push_str("No scenarios were run.\n");
        return out;
    }

    let header = ("Scenario", "Result", "Command");
    let rows: Vec<(String, String, String)> = results
        .iter()
        .map(|result| {
            (
                result.scenario.clone(),
                verdict(result),
                result.command.clone(),
            )
        })
        .collect();

    let scenario_width = width(header.0, rows.iter().map(|row| row.0.as_str()));
    let result_width = width(header.1, rows.iter().map(|row| row.1.as_str()));

    out.push_str("\nScenario results:\n\n");
    out.push_str(&format!(
        "  {:scenario_width$}  {:result_width$}  {}\n",
        header.0, header.1, header.2
    ));
    for (result, row) in results.iter().zip(rows.iter()) {
        out.push_str(&format!(
            "  {:scenario_width$}  {:result_width$}  {}\n",
            row.0, row.1, row.2
        ));
        for dependency in &result.dependency_state {
            let expected = dependency
                .version_expected
                .as_deref()
                .unwrap_or("removed");
            let seen = dependency.version_seen.as_deref().unwrap_or("not installed");
            out.push_str(&format!(
                "    {}: expected {expected}, saw {seen} ({})\n",
                dependency.name, dependency.package_manager
            ));
        }
    }

    let passed = results.iter().filter(|result| result.result).count();
    let failed = results.len() - passed;
    let allowed = results
        .iter()
        .filter(|result| !result.result && result.allowed_to_fail)
        .count();
    out.push('\n');
    out.push_str(&format!("{passed} passed, {failed} failed"));
    if allowed > 0 {
        out.push_str(&format!(" ({allowed} allowed to fail)"));
    }
    out.push('\n');
    out
}

fn verdict(result: &ScenarioResult) -> String {
    match (result.result, result.allowed_to_fail) {
        (true, _) => "PASS".to_string(),
        (false, true) => "FAIL (allowed)".to_string(),
        (false, false) => "FAIL".to_string(),
    }
}

fn width<'a, I>(header: &str, cells: I) -> usize
where
    I: Iterator<Item = &'a str>,
{
    cells
        .map(str::len)
        .chain(std::iter::once(header.len()))
        .max()
        .unwrap_or(0)
}
