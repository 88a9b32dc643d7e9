use crate::{error::GuardError, models::PaymentChallenge};

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Param,
}

#[derive(Debug, Clone)]
struct PatternRoute {
    segments: Vec<Segment>,
    /// Pattern ended in `*` and matches any remaining suffix.
    wildcard: bool,
    challenge: PaymentChallenge,
}

impl PatternRoute {
    fn matches(&self, parts: &[&str]) -> bool {
        if self.wildcard {
            if parts.len() < self.segments.len() {
                return false;
            }
        } else if parts.len() != self.segments.len() {
            return false;
        }

        self.segments.iter().zip(parts).all(|(segment, part)| match segment {
            Segment::Literal(literal) => literal == part,
            Segment::Param => !part.is_empty(),
        })
    }
}

/// Maps request paths to the payment challenge that guards them.
///
/// Exact paths win over patterns; patterns are tried in registration order.
/// Patterns use `:name` for a single segment and a trailing `*` for any suffix.
/// Paths not covered are served without payment.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    exact: Vec<(String, PaymentChallenge)>,
    patterns: Vec<PatternRoute>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `pattern`, parsing `challenge` up front so a bad terms
    /// string fails at startup rather than on the first request.
    pub fn route(mut self, pattern: &str, challenge: &str) -> Result<Self, GuardError> {
        let challenge = PaymentChallenge::parse(challenge)?;
        let path = normalize(pattern);

        let is_pattern = path
            .split('/')
            .any(|segment| segment.starts_with(':') || segment == "*");
        if !is_pattern {
            self.exact.push((path.to_string(), challenge));
            return Ok(self);
        }

        let mut segments = Vec::new();
        let mut wildcard = false;
        let parts: Vec<&str> = split(path);
        for (i, part) in parts.iter().enumerate() {
            if *part == "*" {
                if i + 1 != parts.len() {
                    return Err(GuardError::ConfigError(format!(
                        "wildcard must be the last segment in {pattern}"
                    )));
                }
                wildcard = true;
            } else if part.starts_with(':') {
                segments.push(Segment::Param);
            } else {
                segments.push(Segment::Literal(part.to_string()));
            }
        }

        self.patterns.push(PatternRoute {
            segments,
            wildcard,
            challenge,
        });
        Ok(self)
    }

    pub fn challenge_for(&self, path: &str) -> Option<&PaymentChallenge> {
        let path = normalize(path);

        if let Some((_, challenge)) = self.exact.iter().find(|(p, _)| p == path) {
            return Some(challenge);
        }

        let parts = split(path);
        self.patterns
            .iter()
            .find(|route| route.matches(&parts))
            .map(|route| &route.challenge)
    }

    pub fn len(&self) -> usize {
        self.exact.len() + self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn normalize(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/"
    } else {
        trimmed
    }
}

fn split(path: &str) -> Vec<&str> {
    path.trim_start_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TERMS: &str = "usdc:base_sepolia:0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";

    fn terms(amount: &str) -> String {
        format!("{TERMS}?amount={amount}")
    }

    #[test]
    fn exact_routes_ignore_trailing_slash() {
        let table = RouteTable::new().route("/api/premium", TERMS).unwrap();

        assert!(table.challenge_for("/api/premium").is_some());
        assert!(table.challenge_for("/api/premium/").is_some());
        assert!(table.challenge_for("/api/premium/extra").is_none());
        assert!(table.challenge_for("/health").is_none());
    }

    #[test]
    fn params_match_one_segment() {
        let table = RouteTable::new().route("/api/reports/:id", TERMS).unwrap();

        assert!(table.challenge_for("/api/reports/42").is_some());
        assert!(table.challenge_for("/api/reports").is_none());
        assert!(table.challenge_for("/api/reports/42/raw").is_none());
    }

    #[test]
    fn wildcard_matches_suffix() {
        let table = RouteTable::new().route("/files/*", TERMS).unwrap();

        assert!(table.challenge_for("/files/a").is_some());
        assert!(table.challenge_for("/files/a/b/c").is_some());
        assert!(table.challenge_for("/other/a").is_none());
    }

    #[test]
    fn exact_route_beats_earlier_pattern() {
        let table = RouteTable::new()
            .route("/api/reports/:id", &terms("0.01"))
            .unwrap()
            .route("/api/reports/annual", &terms("5"))
            .unwrap();

        assert_eq!(table.challenge_for("/api/reports/annual").unwrap().amount, "5");
        assert_eq!(table.challenge_for("/api/reports/q1").unwrap().amount, "0.01");
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn bad_terms_fail_at_registration() {
        assert!(matches!(
            RouteTable::new().route("/api/premium", "usdc:base_sepolia"),
            Err(GuardError::MalformedChallenge(_))
        ));
        assert!(matches!(
            RouteTable::new().route("/a/*/b", TERMS),
            Err(GuardError::ConfigError(_))
        ));
    }
}
