// src/report_tests.rs

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::NaiveDate;

    use crate::adp_client::{
        AdpCode, AdpLegalName, AdpPerson, AdpWorker, AdpWorkerId, AdpWorkerStatus,
    };
    use crate::cascade_client::{
        CascadeEmployee, CascadeError, CascadeHierarchyNode, CascadeJob, LineManagerLookup,
    };
    use crate::hierarchy::HierarchyIndex;
    use crate::report::*;

    // --- Helpers ---

    fn employee(id: &str, display_id: &str, known_as: &str, last_name: &str) -> CascadeEmployee {
        CascadeEmployee {
            id: id.to_string(),
            display_id: Some(display_id.to_string()),
            known_as: Some(known_as.to_string()),
            last_name: Some(last_name.to_string()),
            national_insurance_number: Some(format!("QQ{}C", display_id)),
            continuous_service_date: None,
            employment_start_date: None,
            employment_left_date: None,
            date_of_birth: None,
        }
    }

    fn job(id: &str, employee_id: &str, title: &str, node_id: Option<&str>) -> CascadeJob {
        CascadeJob {
            id: Some(id.to_string()),
            employee_id: employee_id.to_string(),
            hierarchy_node_id: node_id.map(String::from),
            job_title: Some(title.to_string()),
            line_manager_id: None,
            start_date: None,
            end_date: None,
        }
    }

    fn node(id: &str, level: u32, title: &str, parent_id: Option<&str>) -> CascadeHierarchyNode {
        CascadeHierarchyNode {
            id: id.to_string(),
            level,
            title: Some(title.to_string()),
            parent_id: parent_id.map(String::from),
        }
    }

    fn adp_worker(number: &str, given: &str, family: &str, status: &str) -> AdpWorker {
        AdpWorker {
            associate_oid: Some(format!("OID-{}", number)),
            worker_id: Some(AdpWorkerId {
                id_value: Some(number.to_string()),
            }),
            person: Some(AdpPerson {
                legal_name: Some(AdpLegalName {
                    given_name: Some(given.to_string()),
                    family_name_1: Some(family.to_string()),
                }),
            }),
            worker_status: Some(AdpWorkerStatus {
                status_code: Some(AdpCode {
                    code_value: Some(status.to_string()),
                }),
            }),
        }
    }

    fn iso(date: &str) -> String {
        format!("{}T00:00:00Z", date)
    }

    fn d(date: &str) -> NaiveDate {
        NaiveDate::parse_from_str(date, "%Y-%m-%d").expect("valid test date")
    }

    struct StaticDirectory {
        employees: Vec<CascadeEmployee>,
        calls: AtomicUsize,
    }

    impl StaticDirectory {
        fn new(employees: Vec<CascadeEmployee>) -> Self {
            StaticDirectory {
                employees,
                calls: AtomicUsize::new(0),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LineManagerLookup for StaticDirectory {
        async fn employee_by_id(
            &self,
            employee_id: &str,
        ) -> Result<Option<CascadeEmployee>, CascadeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .employees
                .iter()
                .find(|e| e.id == employee_id)
                .cloned())
        }
    }

    struct FailingDirectory;

    #[async_trait]
    impl LineManagerLookup for FailingDirectory {
        async fn employee_by_id(
            &self,
            employee_id: &str,
        ) -> Result<Option<CascadeEmployee>, CascadeError> {
            Err(CascadeError::Api {
                status: 500,
                endpoint: format!("employees/{}", employee_id),
                message: "upstream unavailable".to_string(),
            })
        }
    }

    // --- Headcount ---

    #[test]
    fn headcount_joins_job_hierarchy_and_payroll() {
        let mut worker = employee("EMP1", "1001", "Ann", "Field");
        worker.continuous_service_date = Some(iso("2021-03-01"));
        let workers = vec![worker];
        let jobs = vec![job("J1", "EMP1", "Site Engineer", Some("team"))];
        let index = HierarchyIndex::build(vec![
            node("root", 1, "Acorn Holdings", None),
            node("division", 2, "Acorn Germany", Some("root")),
            node("team", 4, "Construction", Some("division")),
        ]);

        let rows = build_headcount(&workers, &jobs, &index).expect("headcount should build");
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.employee_id, "1001");
        assert_eq!(row.known_as, "Ann");
        assert_eq!(row.last_name, "Field");
        assert_eq!(row.job_title, "Site Engineer");
        assert_eq!(row.level_1.as_deref(), Some("Acorn Holdings"));
        assert_eq!(row.level_2.as_deref(), Some("Acorn Germany"));
        assert_eq!(row.level_3, None);
        assert_eq!(row.level_4.as_deref(), Some("Construction"));
        assert_eq!(row.payroll, "Acorn Germany (Bureau)");
        assert_eq!(row.continuous_service_date.as_deref(), Some("01/03/2021"));
        assert_eq!(row.employment_left_date, None);
    }

    #[test]
    fn headcount_without_job_gets_defaults() {
        let workers = vec![employee("EMP2", "1002", "Ben", "Mills")];
        let rows = build_headcount(&workers, &[], &HierarchyIndex::build(Vec::new()))
            .expect("headcount should build");
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.job_title, "");
        assert_eq!(row.level_1, None);
        assert_eq!(row.level_6, None);
        assert_eq!(row.payroll, "Unknown");
    }

    #[test]
    fn select_job_prefers_the_open_contract() {
        let mut ended = job("J1", "EMP1", "Old Role", None);
        ended.end_date = Some(iso("2024-05-31"));
        let open = job("J2", "EMP1", "Current Role", None);
        let jobs = vec![ended, open];

        let selected = select_job(&jobs, "EMP1").expect("a job should be selected");
        assert_eq!(selected.job_title.as_deref(), Some("Current Role"));
    }

    #[test]
    fn select_job_falls_back_to_the_last_ended_contract() {
        let mut first = job("J1", "EMP1", "First Role", None);
        first.end_date = Some(iso("2023-01-31"));
        let mut second = job("J2", "EMP1", "Second Role", None);
        second.end_date = Some(iso("2024-05-31"));
        let jobs = vec![first, second];

        let selected = select_job(&jobs, "EMP1").expect("a job should be selected");
        assert_eq!(selected.job_title.as_deref(), Some("Second Role"));
        assert!(select_job(&jobs, "EMP9").is_none());
    }

    #[test]
    fn headcount_preserves_input_order_and_is_idempotent() {
        let workers = vec![
            employee("EMP3", "1003", "Cara", "Jones"),
            employee("EMP1", "1001", "Ann", "Field"),
            employee("EMP2", "1002", "Ben", "Mills"),
        ];
        let jobs = vec![job("J1", "EMP1", "Engineer", None)];
        let index = HierarchyIndex::build(Vec::new());

        let first = build_headcount(&workers, &jobs, &index).expect("first run");
        let second = build_headcount(&workers, &jobs, &index).expect("second run");
        let order: Vec<&str> = first.iter().map(|r| r.employee_id.as_str()).collect();
        assert_eq!(order, vec!["1003", "1001", "1002"]);
        assert_eq!(first, second);
    }

    #[test]
    fn malformed_date_fails_with_the_record_id() {
        let mut worker = employee("EMP9", "1009", "Dev", "Patel");
        worker.continuous_service_date = Some("01/03/2021".to_string());
        let workers = vec![worker];

        let err = build_headcount(&workers, &[], &HierarchyIndex::build(Vec::new()))
            .expect_err("malformed date must fail the report");
        match err {
            ReportError::MalformedDate {
                employee_id,
                field,
                value,
            } => {
                assert_eq!(employee_id, "EMP9");
                assert_eq!(field, "ContinuousServiceDate");
                assert_eq!(value, "01/03/2021");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    // --- Calendar Spans ---

    #[test]
    fn calendar_span_borrows_through_month_ends() {
        assert_eq!(calendar_span(d("2020-02-29"), d("2024-02-28")), (3, 11));
        assert_eq!(calendar_span(d("2020-01-15"), d("2024-01-15")), (4, 0));
        assert_eq!(calendar_span(d("2020-01-15"), d("2024-01-14")), (3, 11));
        assert_eq!(calendar_span(d("2024-03-01"), d("2024-03-01")), (0, 0));
    }

    #[test]
    fn calendar_span_clamps_reversed_ranges() {
        assert_eq!(calendar_span(d("2024-06-01"), d("2023-06-01")), (0, 0));
    }

    // --- Leavers ---

    #[tokio::test]
    async fn leaver_rows_carry_age_service_and_months() {
        let mut leaver = employee("EMP1", "1001", "Ann", "Field");
        leaver.date_of_birth = Some(iso("1990-06-15"));
        leaver.continuous_service_date = Some(iso("2020-02-29"));
        leaver.employment_start_date = Some(iso("2020-02-29"));
        leaver.employment_left_date = Some(iso("2024-02-28"));
        let mut ending_job = job("J1", "EMP1", "Site Engineer", None);
        ending_job.end_date = Some(iso("2024-02-28"));

        let directory = StaticDirectory::new(Vec::new());
        let rows = build_leavers(
            &[leaver],
            &[],
            &[ending_job],
            &HierarchyIndex::build(Vec::new()),
            &directory,
        )
        .await
        .expect("leavers should build");

        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.age_at_leaving.as_deref(), Some("33 years 8 months"));
        assert_eq!(row.length_of_service.as_deref(), Some("3 years 11 months"));
        assert_eq!(row.service_months, Some(47));
        assert_eq!(row.contract_end_date.as_deref(), Some("28/02/2024"));
        assert_eq!(row.employment_start_date.as_deref(), Some("29/02/2020"));
        assert_eq!(row.line_manager, None);
    }

    #[tokio::test]
    async fn leavers_sort_missing_end_dates_first_then_ascending() {
        let make = |id: &str, display: &str| employee(id, display, "T", "Leaver");
        let leavers = vec![make("L1", "2001"), make("L2", "2002"), make("L3", "2003")];
        let mut march = job("J1", "L1", "Role A", None);
        march.end_date = Some(iso("2024-03-31"));
        let open = job("J2", "L2", "Role B", None);
        let mut january = job("J3", "L3", "Role C", None);
        january.end_date = Some(iso("2024-01-15"));
        let jobs = vec![march, open, january];

        let directory = StaticDirectory::new(Vec::new());
        let rows = build_leavers(
            &leavers,
            &[],
            &jobs,
            &HierarchyIndex::build(Vec::new()),
            &directory,
        )
        .await
        .expect("leavers should build");

        let order: Vec<&str> = rows.iter().map(|r| r.employee_id.as_str()).collect();
        assert_eq!(order, vec!["2002", "2003", "2001"]);
    }

    #[tokio::test]
    async fn line_manager_resolves_locally_without_fallback() {
        let mut leaver = employee("EMP1", "1001", "Ann", "Field");
        leaver.employment_left_date = Some(iso("2024-02-28"));
        let mut leaver_job = job("J1", "EMP1", "Engineer", None);
        leaver_job.line_manager_id = Some("MGR1".to_string());
        let manager = employee("MGR1", "2001", "Maya", "Stone");

        let directory = StaticDirectory::new(Vec::new());
        let rows = build_leavers(
            &[leaver],
            &[manager],
            &[leaver_job],
            &HierarchyIndex::build(Vec::new()),
            &directory,
        )
        .await
        .expect("leavers should build");

        assert_eq!(rows[0].line_manager.as_deref(), Some("(2001) Maya Stone"));
        assert_eq!(directory.call_count(), 0);
    }

    #[tokio::test]
    async fn line_manager_falls_back_to_direct_fetch() {
        let leaver = employee("EMP1", "1001", "Ann", "Field");
        let mut leaver_job = job("J1", "EMP1", "Engineer", None);
        leaver_job.line_manager_id = Some("MGR2".to_string());

        let directory = StaticDirectory::new(vec![employee("MGR2", "2002", "Omar", "Reyes")]);
        let rows = build_leavers(
            &[leaver],
            &[],
            &[leaver_job],
            &HierarchyIndex::build(Vec::new()),
            &directory,
        )
        .await
        .expect("leavers should build");

        assert_eq!(rows[0].line_manager.as_deref(), Some("(2002) Omar Reyes"));
        assert_eq!(directory.call_count(), 1);
    }

    #[tokio::test]
    async fn line_manager_missing_everywhere_is_none() {
        let leaver = employee("EMP1", "1001", "Ann", "Field");
        let mut leaver_job = job("J1", "EMP1", "Engineer", None);
        leaver_job.line_manager_id = Some("MGR9".to_string());

        let directory = StaticDirectory::new(Vec::new());
        let rows = build_leavers(
            &[leaver],
            &[],
            &[leaver_job],
            &HierarchyIndex::build(Vec::new()),
            &directory,
        )
        .await
        .expect("leavers should build");

        assert_eq!(rows[0].line_manager, None);
        assert_eq!(directory.call_count(), 1);
    }

    #[tokio::test]
    async fn line_manager_lookup_failure_aborts_the_report() {
        let leaver = employee("EMP1", "1001", "Ann", "Field");
        let mut leaver_job = job("J1", "EMP1", "Engineer", None);
        leaver_job.line_manager_id = Some("MGR9".to_string());

        let err = build_leavers(
            &[leaver],
            &[],
            &[leaver_job],
            &HierarchyIndex::build(Vec::new()),
            &FailingDirectory,
        )
        .await
        .expect_err("lookup failure must surface");

        match err {
            ReportError::ManagerLookup { manager_id, .. } => assert_eq!(manager_id, "MGR9"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    // --- ADP Reconciliation ---

    fn usa_division() -> HierarchyIndex {
        HierarchyIndex::build(vec![
            node("root", 1, "Acorn Holdings", None),
            node("usa", 2, "Acorn USA", Some("root")),
        ])
    }

    #[test]
    fn reconciliation_flags_both_directions() {
        let on_adp = employee("EMP1", "1001", "Ann", "Field");
        let on_uk = employee("EMP2", "1002", "Ben", "Mills");
        let mut left_on_adp = employee("EMP3", "1003", "Cara", "Jones");
        left_on_adp.employment_left_date = Some(iso("2024-01-31"));
        let workers = vec![on_adp, on_uk, left_on_adp];

        let index = HierarchyIndex::build(vec![
            node("root", 1, "Acorn Holdings", None),
            node("usa", 2, "Acorn USA", Some("root")),
            node("uk", 2, "Acorn (UK)", Some("root")),
        ]);
        let jobs = vec![
            job("J1", "EMP1", "Analyst", Some("usa")),
            job("J2", "EMP2", "Analyst", Some("uk")),
            job("J3", "EMP3", "Analyst", Some("usa")),
        ];
        let adp = vec![adp_worker("9999", "Sol", "Marsh", "Active")];

        let rows = build_adp_reconciliation(&workers, &jobs, &index, &adp);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].source, "Cascade");
        assert_eq!(rows[0].identifier, "1001");
        assert_eq!(rows[0].payroll, "Acorn Inc (ADP)");
        assert_eq!(rows[1].source, "ADP");
        assert_eq!(rows[1].identifier, "9999");
        assert_eq!(rows[1].name, "Sol Marsh");
    }

    #[test]
    fn reconciliation_matched_population_is_clean() {
        let workers = vec![employee("EMP1", "1001", "Ann", "Field")];
        let jobs = vec![job("J1", "EMP1", "Analyst", Some("usa"))];
        let adp = vec![
            adp_worker("1001", "Ann", "Field", "Active"),
            adp_worker("7777", "Gone", "Away", "Terminated"),
        ];

        let rows = build_adp_reconciliation(&workers, &jobs, &usa_division(), &adp);
        assert!(rows.is_empty(), "matched population should produce no rows");
    }

    #[test]
    fn reconciliation_ignores_non_adp_payrolls() {
        let workers = vec![employee("EMP2", "1002", "Ben", "Mills")];
        let jobs = Vec::new();
        let adp = Vec::new();

        let rows = build_adp_reconciliation(&workers, &jobs, &usa_division(), &adp);
        assert!(rows.is_empty(), "Unknown payroll is not reconciled against ADP");
    }

    // --- Reporting Period ---

    #[test]
    fn report_period_parses_and_windows() {
        let period: ReportPeriod = "2026-07".parse().expect("period should parse");
        assert_eq!(period.first_day(), d("2026-07-01"));
        assert_eq!(period.last_day(), d("2026-07-31"));
        assert_eq!(period.label(), "2026-07");

        assert!("2026-13".parse::<ReportPeriod>().is_err());
        assert!("2026".parse::<ReportPeriod>().is_err());
        assert!("july".parse::<ReportPeriod>().is_err());
    }

    #[test]
    fn report_period_handles_leap_february() {
        let period = ReportPeriod::new(2024, 2).expect("valid month");
        assert_eq!(period.last_day(), d("2024-02-29"));
    }

    #[test]
    fn previous_month_rolls_over_year_boundaries() {
        assert_eq!(
            ReportPeriod::previous_month(d("2026-08-25")).label(),
            "2026-07"
        );
        assert_eq!(
            ReportPeriod::previous_month(d("2026-01-05")).label(),
            "2025-12"
        );
    }
}
