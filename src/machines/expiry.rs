// Coarse human-readable description of a key's remaining lifetime

use chrono::Duration;

const DAYS_PER_YEAR: i64 = 365;
const DAYS_PER_MONTH: i64 = 30;

/// Bucket a remaining lifetime into a short description.
///
/// Bands are checked top to bottom and every number is floored.
pub fn describe(remaining: Duration) -> String {
    if remaining <= Duration::zero() {
        return "expired".to_string();
    }

    let days = remaining.num_days();
    if days >= DAYS_PER_YEAR {
        "over a year remaining".to_string()
    } else if days >= DAYS_PER_MONTH {
        let months = days / DAYS_PER_MONTH;
        format!(
            "{} months {} days remaining",
            months,
            days - months * DAYS_PER_MONTH
        )
    } else if days >= 1 {
        format!("{} days remaining", days)
    } else if remaining.num_hours() >= 1 {
        format!("{} hours remaining", remaining.num_hours())
    } else if remaining.num_minutes() >= 1 {
        format!("{} minutes remaining", remaining.num_minutes())
    } else {
        "expiring imminently".to_string()
    }
}
