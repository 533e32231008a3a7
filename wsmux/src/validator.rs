//! Custom header checks applied during the upgrade.
//!
//! Every header the negotiator does not handle itself is passed to the predicate;
//! the results are AND-folded per request. Names on the mandatory list are counted,
//! and the count must match the list length exactly for the upgrade to succeed.

type Predicate = Box<dyn Fn(&str, &str) -> bool>;

#[derive(Default)]
pub struct HeaderValidator {
    predicate: Option<Predicate>,
    mandatory: Vec<String>,
}

impl HeaderValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&str, &str) -> bool + 'static,
    {
        self.predicate = Some(Box::new(predicate));
        self
    }

    pub fn with_mandatory<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mandatory = names.into_iter().map(Into::into).collect();
        self
    }

    /// Run the predicate. No predicate accepts everything.
    pub fn validate(&self, name: &str, value: &str) -> bool {
        match &self.predicate {
            Some(predicate) => predicate(name, value),
            None => true,
        }
    }

    /// Case-insensitive membership in the mandatory list.
    pub fn is_mandatory(&self, name: &str) -> bool {
        self.mandatory.iter().any(|m| m.eq_ignore_ascii_case(name))
    }

    pub fn mandatory_count(&self) -> usize {
        self.mandatory.len()
    }
}

impl std::fmt::Debug for HeaderValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeaderValidator")
            .field("predicate", &self.predicate.is_some())
            .field("mandatory", &self.mandatory)
            .finish()
    }
}
