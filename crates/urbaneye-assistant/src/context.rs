//! Context block aggregation.
//!
//! Turns the signed-in user's reports into the natural-language block that
//! grounds the assistant: an identity section, a live report section citing
//! the most recent reports, and an analytics section with aggregate counts.
//! Aggregation is total: empty input and failed fetches still yield a
//! complete, well-formed block.

use chrono::{DateTime, Utc};
use urbaneye_core::{EpochSeconds, Report, UserIdentity};

use crate::reports::ReportSource;

/// Maximum number of reports cited individually.
pub const MAX_CITED_REPORTS: usize = 8;

/// Maximum characters of each cited description.
pub const MAX_DESCRIPTION_CHARS: usize = 80;

const SECONDS_PER_DAY: i64 = 86_400;

/// Guardrails prepended to every context block.
const BASE_INSTRUCTION: &str = "\
You are the UrbanEye AI Assistant, a concise and friendly helper inside the UrbanEye civic issue platform.
UrbanEye lets citizens photograph and report urban problems (potholes, garbage, broken streetlights, water leakage and similar), \
tracks them on a live map, routes them to the responsible government department, and rewards reporters with XP.

Rules:
1. Only answer questions about UrbanEye, civic issues and the user's own reports. Politely decline anything else.
2. Reply in the same language the user writes in.
3. Keep answers to two or three sentences unless more detail is requested.
4. When citing the user's reports or statistics, use only the facts in the context below. Never invent reports.
5. Point users to the relevant feature (Analyze page, Dashboard, Book Service, NGO Help) when it helps.";

// =============================================================================
// ReportAnalytics
// =============================================================================

/// Aggregate counts derived from a user's reports.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportAnalytics {
    pub total: usize,
    pub resolved: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub resolved_this_week: usize,
    pub created_this_month: usize,
    /// Category counts in first-encounter order.
    pub categories: Vec<(String, usize)>,
}

impl ReportAnalytics {
    /// Compute analytics relative to `now` (epoch seconds).
    ///
    /// Time windows use each report's creation time; status changes are not
    /// timestamped by the backend.
    pub fn compute(reports: &[Report], now: EpochSeconds) -> Self {
        let week_ago = now - 7 * SECONDS_PER_DAY;
        let month_ago = now - 30 * SECONDS_PER_DAY;

        let mut analytics = ReportAnalytics {
            total: reports.len(),
            ..Self::default()
        };

        for report in reports {
            match report.status.as_str() {
                "resolved" => {
                    analytics.resolved += 1;
                    if report.created_at > week_ago {
                        analytics.resolved_this_week += 1;
                    }
                }
                "open" | "pending" => analytics.pending += 1,
                "in_progress" => analytics.in_progress += 1,
                _ => {}
            }

            if report.created_at > month_ago {
                analytics.created_this_month += 1;
            }

            match analytics
                .categories
                .iter_mut()
                .find(|(category, _)| *category == report.category)
            {
                Some((_, count)) => *count += 1,
                None => analytics.categories.push((report.category.clone(), 1)),
            }
        }

        analytics
    }
}

// =============================================================================
// ContextAggregator
// =============================================================================

/// Builds the context block injected ahead of the conversation history.
#[derive(Debug, Clone)]
pub struct ContextAggregator {
    max_cited: usize,
    max_description_chars: usize,
}

impl Default for ContextAggregator {
    fn default() -> Self {
        Self::new(MAX_CITED_REPORTS, MAX_DESCRIPTION_CHARS)
    }
}

impl ContextAggregator {
    pub fn new(max_cited: usize, max_description_chars: usize) -> Self {
        Self {
            max_cited,
            max_description_chars,
        }
    }

    /// Fetch the user's reports and build the block.
    ///
    /// A failed fetch degrades to an identity-only block; the error is logged
    /// and never propagated.
    pub async fn refresh(
        &self,
        source: &dyn ReportSource,
        identity: Option<&UserIdentity>,
    ) -> String {
        let Some(identity) = identity else {
            return self.build(None, None, Utc::now());
        };

        match source.my_reports().await {
            Ok(reports) => {
                tracing::info!(report_count = reports.len(), "Assistant context refreshed");
                self.build(Some(identity), Some(reports.as_slice()), Utc::now())
            }
            Err(e) => {
                tracing::warn!(error = %e, "Report fetch failed, using identity-only context");
                self.build(Some(identity), None, Utc::now())
            }
        }
    }

    /// Build the block from already-fetched data.
    ///
    /// `reports` is `None` when the fetch failed, which omits the report and
    /// analytics sections.
    pub fn build(
        &self,
        identity: Option<&UserIdentity>,
        reports: Option<&[Report]>,
        now: DateTime<Utc>,
    ) -> String {
        let mut block = String::from("## Current User\n");

        let Some(identity) = identity else {
            block.push_str(
                "The user is not signed in. Invite them to log in to report issues and track their reports.\n",
            );
            return block;
        };

        block.push_str(&format!(
            "Name: {} | Email: {} | Role: {}\n",
            single_line(&identity.name),
            single_line(&identity.email),
            single_line(&identity.role)
        ));

        let Some(reports) = reports else {
            block.push_str(
                "Live report data is unavailable right now. Do not guess at the user's reports; suggest checking the Dashboard.\n",
            );
            return block;
        };

        block.push('\n');
        block.push_str(&self.live_reports_section(reports));
        block.push('\n');
        block.push_str(&analytics_section(&ReportAnalytics::compute(
            reports,
            now.timestamp(),
        )));
        block
    }

    fn live_reports_section(&self, reports: &[Report]) -> String {
        let mut section = String::from("## Live Report Data\n");
        if reports.is_empty() {
            section.push_str("The user has no reports yet.\n");
            return section;
        }

        let mut recent: Vec<&Report> = reports.iter().collect();
        recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        recent.truncate(self.max_cited);

        section.push_str(&format!(
            "The user has filed {} report(s). Most recent {}:\n",
            reports.len(),
            recent.len()
        ));
        for (i, report) in recent.iter().enumerate() {
            section.push_str(&format!(
                "{}. [{}] \"{}\" | status: {} | severity: {} | department: {} | filed: {}\n",
                i + 1,
                single_line(&report.category),
                self.truncate_description(report.description.as_deref()),
                report.status,
                report.severity,
                report.department,
                format_date(report.created_at)
            ));
        }
        section
    }

    fn truncate_description(&self, description: Option<&str>) -> String {
        let cleaned = description
            .map(single_line)
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| "No description".to_string())
            .replace('"', "'");
        cleaned.chars().take(self.max_description_chars).collect()
    }
}

fn analytics_section(analytics: &ReportAnalytics) -> String {
    let categories = if analytics.categories.is_empty() {
        "none".to_string()
    } else {
        analytics
            .categories
            .iter()
            .map(|(category, count)| format!("{}: {}", category, count))
            .collect::<Vec<_>>()
            .join(", ")
    };

    format!(
        "## Analytics\n\
         - Total reports: {}\n\
         - Resolved: {}\n\
         - Pending: {}\n\
         - In progress: {}\n\
         - Resolved in the last 7 days: {}\n\
         - Created in the last 30 days: {}\n\
         - By category: {}\n",
        analytics.total,
        analytics.resolved,
        analytics.pending,
        analytics.in_progress,
        analytics.resolved_this_week,
        analytics.created_this_month,
        categories
    )
}

/// Full system instruction: guardrails followed by the context block.
pub fn system_instruction(context_block: &str) -> String {
    format!("{}\n\n# Context\n{}", BASE_INSTRUCTION, context_block)
}

/// Collapse newlines and runs of whitespace so a value stays on one line.
fn single_line(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Format epoch seconds as e.g. `14 Nov 2023` (UTC).
fn format_date(epoch: EpochSeconds) -> String {
    DateTime::from_timestamp(epoch, 0)
        .map(|dt| dt.format("%d %b %Y").to_string())
        .unwrap_or_else(|| "unknown date".to_string())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reports::StaticReportSource;

    const NOW: i64 = 1_700_000_000;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(NOW, 0).unwrap()
    }

    fn identity() -> UserIdentity {
        UserIdentity::new("Asha Verma", "asha@example.com", "civilian")
    }

    fn report(category: &str, status: &str, created_at: i64) -> Report {
        Report {
            id: None,
            category: category.to_string(),
            description: Some(format!("{} reported near the market", category)),
            severity: "medium".to_string(),
            status: status.to_string(),
            department: "Roads".to_string(),
            created_at,
        }
    }

    fn ten_reports() -> Vec<Report> {
        let day = SECONDS_PER_DAY;
        vec![
            report("pothole", "resolved", NOW - day),
            report("pothole", "resolved", NOW - 3 * day),
            report("garbage", "resolved", NOW - 10 * day),
            report("street_light", "resolved", NOW - 40 * day),
            report("garbage", "open", NOW - 2 * day),
            report("drainage", "open", NOW - 20 * day),
            report("pothole", "open", NOW - 50 * day),
            report("sewage", "in_progress", NOW - 5 * day),
            report("garbage", "in_progress", NOW - 25 * day),
            report("drainage", "in_progress", NOW - 60 * day),
        ]
    }

    // ---- Analytics ----

    #[test]
    fn test_analytics_status_buckets() {
        let analytics = ReportAnalytics::compute(&ten_reports(), NOW);
        assert_eq!(analytics.total, 10);
        assert_eq!(analytics.resolved, 4);
        assert_eq!(analytics.pending, 3);
        assert_eq!(analytics.in_progress, 3);
    }

    #[test]
    fn test_analytics_category_histogram_sums_to_total() {
        let analytics = ReportAnalytics::compute(&ten_reports(), NOW);
        let sum: usize = analytics.categories.iter().map(|(_, c)| c).sum();
        assert_eq!(sum, 10);
        // Encounter order
        let names: Vec<&str> = analytics.categories.iter().map(|(c, _)| c.as_str()).collect();
        assert_eq!(
            names,
            vec!["pothole", "garbage", "street_light", "drainage", "sewage"]
        );
        assert_eq!(analytics.categories[0], ("pothole".to_string(), 3));
    }

    #[test]
    fn test_analytics_time_windows() {
        let analytics = ReportAnalytics::compute(&ten_reports(), NOW);
        // Resolved and created within 7 days: 1 day and 3 days ago.
        assert_eq!(analytics.resolved_this_week, 2);
        // Created within 30 days: 1, 3, 10, 2, 20, 5, 25 days ago.
        assert_eq!(analytics.created_this_month, 7);
    }

    #[test]
    fn test_analytics_window_boundary_is_exclusive() {
        let reports = vec![report("pothole", "resolved", NOW - 7 * SECONDS_PER_DAY)];
        let analytics = ReportAnalytics::compute(&reports, NOW);
        assert_eq!(analytics.resolved_this_week, 0);
        assert_eq!(analytics.created_this_month, 1);
    }

    #[test]
    fn test_analytics_other_statuses_only_count_toward_total() {
        let reports = vec![report("pothole", "assigned", NOW)];
        let analytics = ReportAnalytics::compute(&reports, NOW);
        assert_eq!(analytics.total, 1);
        assert_eq!(analytics.resolved + analytics.pending + analytics.in_progress, 0);
    }

    // ---- Block rendering ----

    #[test]
    fn test_build_with_reports_has_all_sections() {
        let agg = ContextAggregator::default();
        let block = agg.build(Some(&identity()), Some(ten_reports().as_slice()), now());
        assert!(block.contains("## Current User"));
        assert!(block.contains("Name: Asha Verma | Email: asha@example.com | Role: civilian"));
        assert!(block.contains("## Live Report Data"));
        assert!(block.contains("The user has filed 10 report(s). Most recent 8:"));
        assert!(block.contains("## Analytics"));
        assert!(block.contains("- Resolved: 4"));
        assert!(block.contains("- Pending: 3"));
        assert!(block.contains("- In progress: 3"));
        assert!(block.contains("- By category: pothole: 3, garbage: 3"));
    }

    #[test]
    fn test_build_cites_at_most_eight_newest_first() {
        let agg = ContextAggregator::default();
        let block = agg.build(Some(&identity()), Some(ten_reports().as_slice()), now());
        assert!(block.contains("8. ["));
        assert!(!block.contains("9. ["));
        // Newest report (1 day ago) is cited first.
        assert!(block.contains("1. [pothole]"));
        // The two oldest (50 and 60 days) are not cited.
        let cited: Vec<&str> = block.lines().filter(|l| l.contains("| filed:")).collect();
        assert_eq!(cited.len(), 8);
        assert!(!cited.iter().any(|l| l.contains("[drainage]") && l.contains("in_progress")));
    }

    #[test]
    fn test_build_zero_reports_has_no_reports_marker() {
        let agg = ContextAggregator::default();
        let block = agg.build(Some(&identity()), Some(&[][..]), now());
        assert!(block.contains("no reports yet"));
        assert!(block.contains("- Total reports: 0"));
        assert!(block.contains("- By category: none"));
        assert!(!block.contains("{}"));
    }

    #[test]
    fn test_build_fetch_failure_is_identity_only() {
        let agg = ContextAggregator::default();
        let block = agg.build(Some(&identity()), None, now());
        assert!(block.contains("## Current User"));
        assert!(block.contains("Asha Verma"));
        assert!(block.contains("unavailable"));
        assert!(!block.contains("## Live Report Data"));
        assert!(!block.contains("## Analytics"));
    }

    #[test]
    fn test_build_signed_out() {
        let agg = ContextAggregator::default();
        let block = agg.build(None, None, now());
        assert!(block.contains("not signed in"));
        assert!(!block.is_empty());
    }

    #[test]
    fn test_description_truncated_to_80_chars() {
        let mut long = report("pothole", "open", NOW);
        long.description = Some("x".repeat(200));
        let agg = ContextAggregator::default();
        let block = agg.build(Some(&identity()), Some(&[long][..]), now());
        assert!(block.contains(&format!("\"{}\"", "x".repeat(80))));
        assert!(!block.contains(&"x".repeat(81)));
    }

    #[test]
    fn test_description_truncation_respects_char_boundaries() {
        let mut hindi = report("garbage", "open", NOW);
        hindi.description = Some("कचरा".repeat(40));
        let agg = ContextAggregator::default();
        let truncated = agg.truncate_description(hindi.description.as_deref());
        assert_eq!(truncated.chars().count(), 80);
    }

    #[test]
    fn test_missing_and_multiline_descriptions_stay_on_one_line() {
        let mut multi = report("sewage", "open", NOW);
        multi.description = Some("line one\nline \"two\"".to_string());
        let mut none = report("garbage", "open", NOW - 1);
        none.description = None;
        let agg = ContextAggregator::default();
        let block = agg.build(Some(&identity()), Some(&[multi, none][..]), now());
        assert!(block.contains("\"line one line 'two'\""));
        assert!(block.contains("\"No description\""));
    }

    #[test]
    fn test_date_formatting() {
        assert_eq!(format_date(NOW), "14 Nov 2023");
        assert_eq!(format_date(i64::MAX), "unknown date");
    }

    #[test]
    fn test_system_instruction_embeds_block() {
        let instruction = system_instruction("## Current User\nName: A\n");
        assert!(instruction.starts_with("You are the UrbanEye AI Assistant"));
        assert!(instruction.ends_with("Name: A\n"));
    }

    // ---- Refresh ----

    #[tokio::test]
    async fn test_refresh_with_reports() {
        let agg = ContextAggregator::default();
        let source = StaticReportSource::new(vec![report("pothole", "open", NOW)]);
        let block = agg.refresh(&source, Some(&identity())).await;
        assert!(block.contains("## Live Report Data"));
        assert!(block.contains("[pothole]"));
    }

    #[tokio::test]
    async fn test_refresh_fetch_failure_falls_back() {
        let agg = ContextAggregator::default();
        let block = agg
            .refresh(&StaticReportSource::failing(), Some(&identity()))
            .await;
        assert!(block.contains("Asha Verma"));
        assert!(!block.contains("## Analytics"));
    }

    #[tokio::test]
    async fn test_refresh_signed_out_skips_fetch() {
        let agg = ContextAggregator::default();
        let block = agg.refresh(&StaticReportSource::failing(), None).await;
        assert!(block.contains("not signed in"));
    }
}
