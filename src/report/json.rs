//! JSON output for scan results.
//!
//! Serializes a run together with its findings for scripting and piping.

use serde::Serialize;

use crate::model::{Finding, ScanRun};

#[derive(Serialize)]
struct ScanReport<'a> {
    scan: &'a ScanRun,
    findings: &'a [Finding],
}

pub fn render(run: &ScanRun, findings: &[Finding]) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&ScanReport { scan: run, findings })
}

pub fn render_history(runs: &[ScanRun]) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(runs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FamilyOutcome, ResourceFamily, ScanTarget};
    use chrono::Utc;

    #[test]
    fn includes_manifest_and_findings_keys() {
        let mut run = ScanRun::new(ScanTarget::new("eu-west-2").with_account("123456789012"));
        run.start(Utc::now()).unwrap();
        run.complete(&[], vec![FamilyOutcome::failed(ResourceFamily::Rds, "not authorized")], Utc::now())
            .unwrap();

        let value: serde_json::Value = serde_json::from_str(&render(&run, &[]).unwrap()).unwrap();
        assert_eq!(value["scan"]["status"], "completed");
        assert_eq!(value["scan"]["target"]["account"], "123456789012");
        assert_eq!(value["scan"]["manifest"][0]["family"], "rds");
        assert_eq!(value["scan"]["manifest"][0]["status"], "failed");
        assert!(value["findings"].as_array().unwrap().is_empty());
    }
}
