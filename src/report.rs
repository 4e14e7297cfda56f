// src/report.rs

use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use chrono::{Datelike, Months, NaiveDate, NaiveDateTime};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::adp_client::AdpWorker;
use crate::cascade_client::{CascadeEmployee, CascadeError, CascadeJob, LineManagerLookup};
use crate::hierarchy::{resolve_path, HierarchyIndex, ResolvedPath};
use crate::payroll::classify_path;

// Cascade sends date-times with a Z suffix; the reports show day-first dates.
const SOURCE_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";
const DISPLAY_DATE_FORMAT: &str = "%d/%m/%Y";

// --- Error Type ---

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Malformed date in '{field}' for employee '{employee_id}': '{value}'")]
    MalformedDate {
        employee_id: String,
        field: &'static str,
        value: String,
    },

    #[error("Line manager lookup failed for '{manager_id}': {source}")]
    ManagerLookup {
        manager_id: String,
        #[source]
        source: CascadeError,
    },
}

// --- Reporting Period ---

/// One calendar month, the window a run reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportPeriod {
    start: NaiveDate,
}

impl ReportPeriod {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, 1).map(|start| ReportPeriod { start })
    }

    /// The month before `today`, the default window for a scheduled run in
    /// the first days of a month.
    pub fn previous_month(today: NaiveDate) -> Self {
        let first_of_current = today.with_day(1).unwrap_or(today);
        let start = first_of_current
            .checked_sub_months(Months::new(1))
            .unwrap_or(first_of_current);
        ReportPeriod { start }
    }

    pub fn first_day(&self) -> NaiveDate {
        self.start
    }

    pub fn last_day(&self) -> NaiveDate {
        self.start
            .checked_add_months(Months::new(1))
            .and_then(|next| next.pred_opt())
            .unwrap_or(self.start)
    }

    pub fn label(&self) -> String {
        self.start.format("%Y-%m").to_string()
    }
}

impl FromStr for ReportPeriod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (year, month) = s
            .split_once('-')
            .ok_or_else(|| format!("expected YYYY-MM, got '{}'", s))?;
        let year: i32 = year
            .parse()
            .map_err(|_| format!("invalid year in '{}'", s))?;
        let month: u32 = month
            .parse()
            .map_err(|_| format!("invalid month in '{}'", s))?;
        ReportPeriod::new(year, month).ok_or_else(|| format!("month out of range in '{}'", s))
    }
}

// --- Report Rows ---

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct FlatEmployeeRecord {
    pub employee_id: String,
    pub known_as: String,
    pub last_name: String,
    pub national_insurance_number: String,
    pub job_title: String,
    pub level_1: Option<String>,
    pub level_2: Option<String>,
    pub level_3: Option<String>,
    pub level_4: Option<String>,
    pub level_5: Option<String>,
    pub level_6: Option<String>,
    pub payroll: String,
    pub continuous_service_date: Option<String>,
    pub employment_left_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct FlatLeaverRecord {
    pub employee_id: String,
    pub known_as: String,
    pub last_name: String,
    pub national_insurance_number: String,
    pub job_title: String,
    pub payroll: String,
    pub employment_start_date: Option<String>,
    pub continuous_service_date: Option<String>,
    pub contract_end_date: Option<String>,
    pub age_at_leaving: Option<String>,
    pub length_of_service: Option<String>,
    pub service_months: Option<i32>,
    pub line_manager: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReconciliationRecord {
    pub source: String,
    pub identifier: String,
    pub name: String,
    pub payroll: String,
    pub finding: String,
}

// --- Date Helpers ---

fn parse_source_date(value: &str) -> Option<NaiveDate> {
    NaiveDateTime::parse_from_str(value, SOURCE_DATE_FORMAT)
        .ok()
        .map(|dt| dt.date())
}

/// Parses an optional source date-time, attributing failures to the record
/// that carried it. Null stays null; a malformed non-null string aborts the
/// report rather than truncating it silently.
fn parse_date_field(
    value: Option<&str>,
    field: &'static str,
    employee_id: &str,
) -> Result<Option<NaiveDate>, ReportError> {
    match value {
        None => Ok(None),
        Some(raw) => {
            let date = parse_source_date(raw).ok_or_else(|| ReportError::MalformedDate {
                employee_id: employee_id.to_string(),
                field,
                value: raw.to_string(),
            })?;
            Ok(Some(date))
        }
    }
}

fn reformat_date(
    value: Option<&str>,
    field: &'static str,
    employee_id: &str,
) -> Result<Option<String>, ReportError> {
    let parsed = parse_date_field(value, field, employee_id)?;
    Ok(parsed.map(|date| date.format(DISPLAY_DATE_FORMAT).to_string()))
}

/// Whole calendar years and remaining months between two dates. The month
/// count drops by one when the end day-of-month sits before the start
/// day-of-month, borrowing from the year count when that goes negative.
pub fn calendar_span(start: NaiveDate, end: NaiveDate) -> (i32, u32) {
    if end < start {
        warn!("Calendar span requested with end {} before start {}", end, start);
        return (0, 0);
    }
    let mut years = end.year() - start.year();
    let mut months = end.month() as i32 - start.month() as i32;
    if end.day() < start.day() {
        months -= 1;
    }
    if months < 0 {
        years -= 1;
        months += 12;
    }
    (years, months as u32)
}

fn format_span(span: (i32, u32)) -> String {
    format!("{} years {} months", span.0, span.1)
}

// --- Record Joining ---

/// Picks the job record a report row is built from. Policy: the last
/// matching job with no end date wins; when every match has ended, the last
/// match wins. Employees with several concurrent jobs get exactly one row.
pub fn select_job<'a>(jobs: &'a [CascadeJob], employee_id: &str) -> Option<&'a CascadeJob> {
    let mut last_match: Option<&CascadeJob> = None;
    let mut last_open: Option<&CascadeJob> = None;
    for job in jobs.iter().filter(|j| j.employee_id == employee_id) {
        last_match = Some(job);
        if job.end_date.is_none() {
            last_open = Some(job);
        }
    }
    last_open.or(last_match)
}

fn resolve_job_path(
    job: Option<&CascadeJob>,
    index: &HierarchyIndex,
) -> ResolvedPath {
    match job.and_then(|j| j.hierarchy_node_id.as_deref()) {
        Some(node_id) => resolve_path(index, node_id),
        None => ResolvedPath::default(),
    }
}

fn owned_title(path: &ResolvedPath, level: usize) -> Option<String> {
    path.title(level).map(String::from)
}

/// Joins every employee to their job and hierarchy position, producing the
/// headcount rows in employee input order. Employees without a job keep a
/// row with empty job fields and an Unknown payroll.
pub fn build_headcount(
    workers: &[CascadeEmployee],
    jobs: &[CascadeJob],
    index: &HierarchyIndex,
) -> Result<Vec<FlatEmployeeRecord>, ReportError> {
    info!("Building headcount rows for {} employees", workers.len());
    let mut rows = Vec::with_capacity(workers.len());
    for worker in workers {
        let job = select_job(jobs, &worker.id);
        if job.is_none() {
            debug!("Employee '{}' has no job record", worker.id);
        }
        let path = resolve_job_path(job, index);
        let payroll = classify_path(&path);
        rows.push(FlatEmployeeRecord {
            employee_id: worker.display_id.clone().unwrap_or_default(),
            known_as: worker.known_as.clone().unwrap_or_default(),
            last_name: worker.last_name.clone().unwrap_or_default(),
            national_insurance_number: worker
                .national_insurance_number
                .clone()
                .unwrap_or_default(),
            job_title: job.and_then(|j| j.job_title.clone()).unwrap_or_default(),
            level_1: owned_title(&path, 1),
            level_2: owned_title(&path, 2),
            level_3: owned_title(&path, 3),
            level_4: owned_title(&path, 4),
            level_5: owned_title(&path, 5),
            level_6: owned_title(&path, 6),
            payroll: payroll.to_string(),
            continuous_service_date: reformat_date(
                worker.continuous_service_date.as_deref(),
                "ContinuousServiceDate",
                &worker.id,
            )?,
            employment_left_date: reformat_date(
                worker.employment_left_date.as_deref(),
                "EmploymentLeftDate",
                &worker.id,
            )?,
        });
    }
    Ok(rows)
}

// --- Leaver Enrichment ---

async fn resolve_line_manager(
    job: Option<&CascadeJob>,
    workers_by_id: &HashMap<&str, &CascadeEmployee>,
    lookup: &dyn LineManagerLookup,
) -> Result<Option<String>, ReportError> {
    let manager_id = match job.and_then(|j| j.line_manager_id.as_deref()) {
        Some(id) if !id.is_empty() => id,
        _ => return Ok(None),
    };
    if let Some(manager) = workers_by_id.get(manager_id) {
        return Ok(Some(format_line_manager(manager)));
    }
    debug!(
        "Line manager '{}' absent from bulk employee fetch, trying direct fetch",
        manager_id
    );
    match lookup.employee_by_id(manager_id).await {
        Ok(Some(manager)) => Ok(Some(format_line_manager(&manager))),
        Ok(None) => {
            warn!("Line manager '{}' not found in Cascade", manager_id);
            Ok(None)
        }
        Err(source) => Err(ReportError::ManagerLookup {
            manager_id: manager_id.to_string(),
            source,
        }),
    }
}

fn format_line_manager(manager: &CascadeEmployee) -> String {
    format!(
        "({}) {} {}",
        manager.display_id.as_deref().unwrap_or(""),
        manager.known_as.as_deref().unwrap_or(""),
        manager.last_name.as_deref().unwrap_or("")
    )
}

/// Builds the leaver rows: the headcount join plus age at leaving, length
/// of service and line manager. Rows come back sorted by contract end date
/// ascending, with missing end dates first.
pub async fn build_leavers(
    leavers: &[CascadeEmployee],
    workers: &[CascadeEmployee],
    jobs: &[CascadeJob],
    index: &HierarchyIndex,
    lookup: &dyn LineManagerLookup,
) -> Result<Vec<FlatLeaverRecord>, ReportError> {
    info!("Building leaver rows for {} leavers", leavers.len());
    let workers_by_id: HashMap<&str, &CascadeEmployee> =
        workers.iter().map(|w| (w.id.as_str(), w)).collect();

    let mut keyed: Vec<(String, FlatLeaverRecord)> = Vec::with_capacity(leavers.len());
    for leaver in leavers {
        let job = select_job(jobs, &leaver.id);
        let path = resolve_job_path(job, index);
        let payroll = classify_path(&path);

        let left = parse_date_field(
            leaver.employment_left_date.as_deref(),
            "EmploymentLeftDate",
            &leaver.id,
        )?;
        let born = parse_date_field(leaver.date_of_birth.as_deref(), "DateOfBirth", &leaver.id)?;
        let service_from = parse_date_field(
            leaver.continuous_service_date.as_deref(),
            "ContinuousServiceDate",
            &leaver.id,
        )?;

        let age = match (born, left) {
            (Some(born), Some(left)) => Some(calendar_span(born, left)),
            _ => None,
        };
        let service = match (service_from, left) {
            (Some(from), Some(left)) => Some(calendar_span(from, left)),
            _ => None,
        };

        let line_manager = resolve_line_manager(job, &workers_by_id, lookup).await?;

        // Sorting uses the raw ISO end date; the day-first display form
        // would not order chronologically.
        let sort_key = job
            .and_then(|j| j.end_date.clone())
            .unwrap_or_default();

        keyed.push((
            sort_key,
            FlatLeaverRecord {
                employee_id: leaver.display_id.clone().unwrap_or_default(),
                known_as: leaver.known_as.clone().unwrap_or_default(),
                last_name: leaver.last_name.clone().unwrap_or_default(),
                national_insurance_number: leaver
                    .national_insurance_number
                    .clone()
                    .unwrap_or_default(),
                job_title: job.and_then(|j| j.job_title.clone()).unwrap_or_default(),
                payroll: payroll.to_string(),
                employment_start_date: reformat_date(
                    leaver.employment_start_date.as_deref(),
                    "EmploymentStartDate",
                    &leaver.id,
                )?,
                continuous_service_date: reformat_date(
                    leaver.continuous_service_date.as_deref(),
                    "ContinuousServiceDate",
                    &leaver.id,
                )?,
                contract_end_date: reformat_date(
                    job.and_then(|j| j.end_date.as_deref()),
                    "EndDate",
                    &leaver.id,
                )?,
                age_at_leaving: age.map(format_span),
                length_of_service: service.map(format_span),
                service_months: service.map(|(years, months)| years * 12 + months as i32),
                line_manager,
            },
        ));
    }

    keyed.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(keyed.into_iter().map(|(_, row)| row).collect())
}

// --- ADP Reconciliation ---

/// Cross-checks the ADP-processed population both ways: active Cascade
/// employees on an ADP payroll must appear in the ADP workers feed (keyed
/// on payroll number), and active ADP workers must map back to an active
/// Cascade employee. Matched populations produce no rows.
pub fn build_adp_reconciliation(
    workers: &[CascadeEmployee],
    jobs: &[CascadeJob],
    index: &HierarchyIndex,
    adp_workers: &[AdpWorker],
) -> Vec<ReconciliationRecord> {
    let adp_numbers: HashSet<&str> = adp_workers
        .iter()
        .filter(|w| w.is_active())
        .filter_map(|w| w.worker_number())
        .collect();
    let cascade_numbers: HashSet<&str> = workers
        .iter()
        .filter(|w| w.employment_left_date.is_none())
        .filter_map(|w| w.display_id.as_deref())
        .collect();

    let mut rows = Vec::new();

    for worker in workers.iter().filter(|w| w.employment_left_date.is_none()) {
        let job = select_job(jobs, &worker.id);
        let path = resolve_job_path(job, index);
        let payroll = classify_path(&path);
        if !payroll.is_adp_processed() {
            continue;
        }
        let number = worker.display_id.as_deref().unwrap_or("");
        if !adp_numbers.contains(number) {
            rows.push(ReconciliationRecord {
                source: "Cascade".to_string(),
                identifier: number.to_string(),
                name: format!(
                    "{} {}",
                    worker.known_as.as_deref().unwrap_or(""),
                    worker.last_name.as_deref().unwrap_or("")
                ),
                payroll: payroll.to_string(),
                finding: "No active ADP worker with this payroll number".to_string(),
            });
        }
    }

    for adp in adp_workers.iter().filter(|w| w.is_active()) {
        let number = match adp.worker_number() {
            Some(number) => number,
            None => continue,
        };
        if !cascade_numbers.contains(number) {
            rows.push(ReconciliationRecord {
                source: "ADP".to_string(),
                identifier: number.to_string(),
                name: adp.full_name(),
                payroll: String::new(),
                finding: "No active Cascade employee with this payroll number".to_string(),
            });
        }
    }

    if rows.is_empty() {
        info!("ADP reconciliation found no discrepancies");
    } else {
        warn!("ADP reconciliation found {} discrepancies", rows.len());
    }
    rows
}
