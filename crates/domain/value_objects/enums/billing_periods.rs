use std::fmt::Display;

use chrono::{DateTime, Datelike, Days, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BillingPeriod {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl BillingPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingPeriod::Daily => "daily",
            BillingPeriod::Weekly => "weekly",
            BillingPeriod::Monthly => "monthly",
            BillingPeriod::Yearly => "yearly",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "daily" => Some(BillingPeriod::Daily),
            "weekly" => Some(BillingPeriod::Weekly),
            "monthly" => Some(BillingPeriod::Monthly),
            "yearly" => Some(BillingPeriod::Yearly),
            _ => None,
        }
    }

    /// Adds exactly one period to `from`. Month arithmetic clamps to the last day of
    /// the target month (Jan 31 + 1 month = Feb 28/29).
    pub fn advance(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            BillingPeriod::Daily => from.checked_add_days(Days::new(1)),
            BillingPeriod::Weekly => from.checked_add_days(Days::new(7)),
            BillingPeriod::Monthly => from.checked_add_months(Months::new(1)),
            BillingPeriod::Yearly => from.checked_add_months(Months::new(12)),
        }
    }

    /// Like [`advance`](Self::advance), but a due date that was clamped to a month end
    /// (Jan 31 -> Feb 29) returns to `anchor_day` once the month is long enough again.
    pub fn advance_anchored(&self, from: DateTime<Utc>, anchor_day: u32) -> Option<DateTime<Utc>> {
        let next = self.advance(from)?;
        match self {
            BillingPeriod::Monthly | BillingPeriod::Yearly
                if from.day() < anchor_day && is_last_day_of_month(from) =>
            {
                next.with_day(anchor_day.min(days_in_month(next.year(), next.month())))
            }
            _ => Some(next),
        }
    }
}

fn is_last_day_of_month(at: DateTime<Utc>) -> bool {
    at.date_naive()
        .succ_opt()
        .is_none_or(|next| next.month() != at.month())
}

fn days_in_month(year: i32, month: u32) -> u32 {
    (28..=31)
        .rev()
        .find(|&day| NaiveDate::from_ymd_opt(year, month, day).is_some())
        .unwrap_or(28)
}

impl Display for BillingPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
