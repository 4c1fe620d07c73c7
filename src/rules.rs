use crate::error::SourceQueryError;
use crate::parse::{Parsed, PayloadCursor};

/// A server configuration variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub name: String,
    pub value: String,
}

/// Rules as obtained by an A2S_RULES query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RulesInfo {
    /// Rule count reported by the server
    pub count: u16,
    pub rules: Vec<Rule>,
}

impl RulesInfo {
    /// Parse the body of an A2S_RULES response (everything after the `E` type byte).
    pub fn parse(body: &[u8]) -> Result<Parsed<RulesInfo>, SourceQueryError> {
        let mut cursor = PayloadCursor::new(body);

        let count = cursor.read_u16()?;
        let mut rules = Vec::with_capacity(count as usize);
        for _ in 0..count {
            rules.push(Rule {
                name: cursor.read_cstring()?,
                value: cursor.read_cstring()?,
            });
        }

        Ok(Parsed::complete(RulesInfo { count, rules }))
    }

    /// Value of the rule called `name`, if the server sent one.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.rules
            .iter()
            .find(|r| r.name == name)
            .map(|r| r.value.as_str())
    }
}
