use fail::FailScenario;

/// Configures failpoints for the lifetime of a test and turns them off on drop.
pub struct GateFailScenario<'a> {
    _scenario: FailScenario<'a>,
    failpoints: Vec<String>,
}

impl<'a> GateFailScenario<'a> {
    /// Sets up `failpoints`, each given as `(name, action)`.
    pub fn setup(failpoints: &[(&str, &str)]) -> GateFailScenario<'a> {
        let scenario = FailScenario::setup();

        for (failpoint, action) in failpoints {
            fail::cfg(*failpoint, action).unwrap();
        }

        Self {
            _scenario: scenario,
            failpoints: failpoints.iter().map(|(name, _)| name.to_string()).collect(),
        }
    }

    /// Turns a configured failpoint off before the scenario ends.
    pub fn disable(&self, failpoint: &str) {
        fail::cfg(failpoint, "off").unwrap();
    }
}

impl Drop for GateFailScenario<'_> {
    fn drop(&mut self) {
        for failpoint in &self.failpoints {
            fail::cfg(failpoint, "off").unwrap();
        }
    }
}
