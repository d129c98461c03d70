//! Access Rules
//!
//! An [`AccessRule`] is one conjunctive predicate over three independent
//! dimensions: group membership, source subnet and validity date. Each
//! dimension is either "any" (`None`) or a value set with its own invert flag.
//! Set-valued dimensions are kept in ordered sets so that equal rules compare,
//! hash and serialize identically; the store relies on this to intern rules.

use crate::types::{AccessType, GroupId, RuleId};

use chrono::NaiveDate;
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::net::Ipv4Addr;

/// One end of a date interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DateBound {
    Unbounded,
    Inclusive(NaiveDate),
    Exclusive(NaiveDate),
}

/// Date interval, possibly open-ended on either side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DateRange {
    pub lower: DateBound,
    pub upper: DateBound,
}

impl DateRange {
    pub fn new(lower: DateBound, upper: DateBound) -> Self {
        Self { lower, upper }
    }

    /// Dates before `date` (`date` itself included when `inclusive`)
    pub fn before(date: NaiveDate, inclusive: bool) -> Self {
        let upper = if inclusive {
            DateBound::Inclusive(date)
        } else {
            DateBound::Exclusive(date)
        };
        Self::new(DateBound::Unbounded, upper)
    }

    /// Dates after `date` (`date` itself included when `inclusive`)
    pub fn after(date: NaiveDate, inclusive: bool) -> Self {
        let lower = if inclusive {
            DateBound::Inclusive(date)
        } else {
            DateBound::Exclusive(date)
        };
        Self::new(lower, DateBound::Unbounded)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        let above_lower = match self.lower {
            DateBound::Unbounded => true,
            DateBound::Inclusive(d) => date >= d,
            DateBound::Exclusive(d) => date > d,
        };
        let below_upper = match self.upper {
            DateBound::Unbounded => true,
            DateBound::Inclusive(d) => date <= d,
            DateBound::Exclusive(d) => date < d,
        };
        above_lower && below_upper
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.lower {
            DateBound::Unbounded => write!(f, "(-inf")?,
            DateBound::Inclusive(d) => write!(f, "[{}", d)?,
            DateBound::Exclusive(d) => write!(f, "({}", d)?,
        }
        match self.upper {
            DateBound::Unbounded => write!(f, ", +inf)"),
            DateBound::Inclusive(d) => write!(f, ", {}]", d),
            DateBound::Exclusive(d) => write!(f, ", {})", d),
        }
    }
}

/// Rule dimension a condition constrains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Dimension {
    Group,
    Subnet,
    Date,
}

/// Conjunctive predicate over group, subnet and date
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccessRule {
    pub group_ids: Option<BTreeSet<GroupId>>,
    pub subnets: Option<BTreeSet<Ipv4Network>>,
    pub dateranges: Option<BTreeSet<DateRange>>,
    pub invert_group: bool,
    pub invert_subnet: bool,
    pub invert_date: bool,
}

impl AccessRule {
    /// The unique rule matching every request
    pub fn match_all() -> Self {
        Self::default()
    }

    pub fn is_match_all(&self) -> bool {
        *self == Self::match_all()
    }

    pub fn with_groups(groups: impl IntoIterator<Item = GroupId>) -> Self {
        Self {
            group_ids: Some(groups.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn with_subnets(subnets: impl IntoIterator<Item = Ipv4Network>) -> Self {
        Self {
            subnets: Some(subnets.into_iter().map(canonical_network).collect()),
            ..Self::default()
        }
    }

    pub fn with_dateranges(ranges: impl IntoIterator<Item = DateRange>) -> Self {
        Self {
            dateranges: Some(ranges.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn dimension_is_set(&self, dimension: Dimension) -> bool {
        match dimension {
            Dimension::Group => self.group_ids.is_some(),
            Dimension::Subnet => self.subnets.is_some(),
            Dimension::Date => self.dateranges.is_some(),
        }
    }

    /// Normalize into the canonical form used for content addressing.
    ///
    /// Empty value sets collapse to "any", subnets drop host bits, and the
    /// invert flag of an unset dimension is cleared.
    pub fn canonicalize(mut self) -> Self {
        if self.group_ids.as_ref().is_some_and(|g| g.is_empty()) {
            self.group_ids = None;
        }
        if self.dateranges.as_ref().is_some_and(|d| d.is_empty()) {
            self.dateranges = None;
        }
        self.subnets = self
            .subnets
            .map(|s| s.into_iter().map(canonical_network).collect::<BTreeSet<_>>())
            .filter(|s| !s.is_empty());

        self.invert_group &= self.group_ids.is_some();
        self.invert_subnet &= self.subnets.is_some();
        self.invert_date &= self.dateranges.is_some();
        self
    }

    /// Evaluate the predicate: every populated dimension must hold, each
    /// tested as `invert XOR membership`
    pub fn matches(&self, groups: &BTreeSet<GroupId>, ip: Ipv4Addr, date: NaiveDate) -> bool {
        let group_ok = self.group_ids.as_ref().map_or(true, |ids| {
            self.invert_group != ids.iter().any(|id| groups.contains(id))
        });
        let subnet_ok = self.subnets.as_ref().map_or(true, |nets| {
            self.invert_subnet != nets.iter().any(|net| net.contains(ip))
        });
        let date_ok = self.dateranges.as_ref().map_or(true, |ranges| {
            self.invert_date != ranges.iter().any(|range| range.contains(date))
        });
        group_ok && subnet_ok && date_ok
    }
}

impl fmt::Display for AccessRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_match_all() {
            return write!(f, "{{any}}");
        }

        let mut parts = Vec::new();
        let neg = |invert: bool| if invert { "!" } else { "" };
        if let Some(ids) = &self.group_ids {
            let ids: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
            parts.push(format!("{}group_ids={{{}}}", neg(self.invert_group), ids.join(",")));
        }
        if let Some(nets) = &self.subnets {
            let nets: Vec<String> = nets.iter().map(|n| n.to_string()).collect();
            parts.push(format!("{}subnets={{{}}}", neg(self.invert_subnet), nets.join(",")));
        }
        if let Some(ranges) = &self.dateranges {
            let ranges: Vec<String> = ranges.iter().map(|r| r.to_string()).collect();
            parts.push(format!("{}dateranges={{{}}}", neg(self.invert_date), ranges.join(",")));
        }
        write!(f, "{{{}}}", parts.join(" "))
    }
}

/// Rule reference with its association flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RuleAssociation {
    pub rule_id: RuleId,
    /// Negates the rule's match
    pub invert: bool,
    /// Deny-wins gate instead of a permissive grant
    pub blocking: bool,
}

impl RuleAssociation {
    pub fn new(rule_id: RuleId, invert: bool, blocking: bool) -> Self {
        Self {
            rule_id,
            invert,
            blocking,
        }
    }
}

/// Association resolved against its rule, ready for evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveAssociation {
    pub rule_id: RuleId,
    pub rule: AccessRule,
    pub access_type: AccessType,
    pub invert: bool,
    pub blocking: bool,
}

impl EffectiveAssociation {
    /// `invert XOR rule predicate`
    pub fn matches(&self, groups: &BTreeSet<GroupId>, ip: Ipv4Addr, date: NaiveDate) -> bool {
        self.invert != self.rule.matches(groups, ip, date)
    }
}

fn canonical_network(net: Ipv4Network) -> Ipv4Network {
    Ipv4Network::new(net.network(), net.prefix()).unwrap_or(net)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_date_range_bounds() {
        let after = DateRange::after(date(2015, 1, 1), false);
        assert!(!after.contains(date(2015, 1, 1)));
        assert!(after.contains(date(2015, 1, 2)));

        let after_incl = DateRange::after(date(2015, 1, 1), true);
        assert!(after_incl.contains(date(2015, 1, 1)));

        let before = DateRange::before(date(2015, 1, 1), false);
        assert!(before.contains(date(2014, 12, 31)));
        assert!(!before.contains(date(2015, 1, 1)));
        assert!(DateRange::before(date(2015, 1, 1), true).contains(date(2015, 1, 1)));

        assert_eq!(after.to_string(), "(2015-01-01, +inf)");
    }

    #[test]
    fn test_match_all_matches_everything() {
        let rule = AccessRule::match_all();
        assert!(rule.is_match_all());
        assert!(rule.matches(&BTreeSet::new(), Ipv4Addr::new(8, 8, 8, 8), date(1999, 1, 1)));
    }

    #[test]
    fn test_dimensions_are_conjunctive_with_per_dimension_invert() {
        let mut rule = AccessRule::with_groups([1, 2]);
        rule.subnets = Some(["10.0.0.0/8".parse().unwrap()].into_iter().collect());
        rule.invert_subnet = true;

        let staff: BTreeSet<GroupId> = [2].into_iter().collect();
        let outside = Ipv4Addr::new(192, 168, 0, 1);
        let inside = Ipv4Addr::new(10, 1, 1, 1);
        let today = date(2020, 6, 1);

        assert!(rule.matches(&staff, outside, today));
        assert!(!rule.matches(&staff, inside, today));
        assert!(!rule.matches(&BTreeSet::new(), outside, today));
    }

    #[test]
    fn test_canonical_form_is_content_addressable() {
        let a = AccessRule::with_subnets(["10.1.2.3/8".parse().unwrap()]);
        let b = AccessRule::with_subnets(["10.0.0.0/8".parse().unwrap()]);
        assert_eq!(a.clone().canonicalize(), b.clone().canonicalize());

        let mut stray = AccessRule::with_groups(Vec::<GroupId>::new());
        stray.invert_group = true;
        stray.invert_date = true;
        assert!(stray.canonicalize().is_match_all());

        let x = AccessRule::with_groups([3, 1, 2]);
        let y = AccessRule::with_groups([2, 3, 1]);
        assert_eq!(x, y);
        assert_eq!(x.to_string(), "{group_ids={1,2,3}}");
    }

    #[test]
    fn test_association_invert_negates_rule() {
        let assoc = EffectiveAssociation {
            rule_id: 1,
            rule: AccessRule::with_groups([5]),
            access_type: AccessType::Read,
            invert: true,
            blocking: true,
        };
        let member: BTreeSet<GroupId> = [5].into_iter().collect();
        let ip = Ipv4Addr::LOCALHOST;
        assert!(!assoc.matches(&member, ip, date(2020, 1, 1)));
        assert!(assoc.matches(&BTreeSet::new(), ip, date(2020, 1, 1)));
    }
}
