//! The host environment a lab runs in.

/// What the surrounding simulation tells a lab.
pub trait LabHost {
    /// Simulated time in seconds.
    fn now(&self) -> f64;

    /// Names of the crew currently in the lab.
    fn crew(&self) -> &[String];

    fn crew_count(&self) -> u32 {
        u32::try_from(self.crew().len()).unwrap_or(u32::MAX)
    }

    /// Research is allowed here (not resting on the homeworld surface).
    fn is_qualifying_location(&self) -> bool;

    /// Generic research multiplier for the current location.
    fn location_multiplier(&self) -> f64 {
        1.0
    }

    /// Label of the current situation, used in research subject ids.
    fn situation(&self) -> &str;
}

/// A plain value implementation of [`LabHost`] for hosts that can
/// snapshot their state, and for tests.
#[derive(Debug, Clone, PartialEq)]
pub struct HostSnapshot {
    pub now: f64,
    pub crew: Vec<String>,
    pub qualifying_location: bool,
    pub location_multiplier: f64,
    pub situation: String,
}

impl Default for HostSnapshot {
    fn default() -> Self {
        Self {
            now: 0.0,
            crew: Vec::new(),
            qualifying_location: true,
            location_multiplier: 1.0,
            situation: "orbit".to_string(),
        }
    }
}

impl HostSnapshot {
    pub fn at(now: f64) -> Self {
        Self {
            now,
            ..Self::default()
        }
    }

    pub fn with_crew<S: AsRef<str>>(mut self, crew: &[S]) -> Self {
        self.crew = crew.iter().map(|c| c.as_ref().to_string()).collect();
        self
    }

    pub fn advance(&mut self, seconds: f64) {
        self.now += seconds;
    }
}

impl LabHost for HostSnapshot {
    fn now(&self) -> f64 {
        self.now
    }

    fn crew(&self) -> &[String] {
        &self.crew
    }

    fn is_qualifying_location(&self) -> bool {
        self.qualifying_location
    }

    fn location_multiplier(&self) -> f64 {
        self.location_multiplier
    }

    fn situation(&self) -> &str {
        &self.situation
    }
}
