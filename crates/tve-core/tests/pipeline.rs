//! End-to-end flows: tables in, built/merged/stamped episode tables out.

use polars::prelude::{DataFrame, NamedFrom, Series};
use tve_core::{
    build_episodes, episodes_to_frame, integrate_events, merge_sources, read_events, read_periods,
    read_windows,
};
use tve_model::{
    AttrValue, BuildOptions, EncodingMode, EventColumns, EventOptions, MergeOptions, PeriodColumns,
    TimeUnit, WindowColumns, date_to_day,
};

fn day(iso: &str) -> i64 {
    date_to_day(iso.parse().unwrap())
}

fn spans(episodes: &[tve_model::Episode]) -> Vec<(String, i64, i64)> {
    episodes
        .iter()
        .map(|e| (e.subject_id.clone(), e.start, e.stop))
        .collect()
}

#[test]
fn iso_date_tables_build_a_partition() {
    let cohort = DataFrame::new(vec![
        Series::new("pid".into(), vec!["P1"]).into(),
        Series::new("entry".into(), vec!["2020-01-01"]).into(),
        Series::new("exit".into(), vec!["2020-12-31"]).into(),
    ])
    .unwrap();
    let exposure = DataFrame::new(vec![
        Series::new("pid".into(), vec!["P1"]).into(),
        Series::new("rx_start".into(), vec!["2020-02-01"]).into(),
        Series::new("rx_stop".into(), vec!["2020-04-01"]).into(),
        Series::new("drug".into(), vec!["A"]).into(),
    ])
    .unwrap();

    let windows = read_windows(
        &cohort,
        &WindowColumns {
            subject: "pid".into(),
            entry: "entry".into(),
            exit: "exit".into(),
        },
    )
    .unwrap();
    let periods = read_periods(
        &exposure,
        &PeriodColumns {
            subject: "pid".into(),
            start: "rx_start".into(),
            stop: Some("rx_stop".into()),
            value: "drug".into(),
            quantity: None,
        },
    )
    .unwrap();
    assert_eq!(periods.skipped_rows, 0);

    let options = BuildOptions::new().with_reference("none");
    let output = build_episodes(&windows, &periods.records, &options).unwrap();
    assert_eq!(
        spans(&output.episodes),
        vec![
            ("P1".to_string(), day("2020-01-01"), day("2020-02-01")),
            ("P1".to_string(), day("2020-02-01"), day("2020-04-01")),
            ("P1".to_string(), day("2020-04-01"), day("2020-12-31")),
        ]
    );

    let df = episodes_to_frame(&output.episodes).unwrap();
    assert_eq!(df.height(), 3);
    let names: Vec<String> = df.get_column_names().iter().map(|s| s.to_string()).collect();
    assert_eq!(names, vec!["subject_id", "start", "stop", "exposure"]);
}

#[test]
fn build_merge_integrate_flow() {
    let windows = vec![
        tve_model::ObservationWindow::new("P1", 0, 300),
        tve_model::ObservationWindow::new("P2", 0, 300),
    ];
    let exposure_records = vec![
        tve_model::PeriodRecord::new("P1", 50, 150, "A"),
        tve_model::PeriodRecord::new("P2", 0, 300, "B"),
    ];
    let statin_records = vec![
        tve_model::PeriodRecord::new("P1", 100, 300, "1"),
        tve_model::PeriodRecord::new("P2", 0, 0, "1"),
    ];

    let exposure = build_episodes(
        &windows,
        &exposure_records,
        &BuildOptions::new().with_reference("none"),
    )
    .unwrap();
    let statin = build_episodes(
        &windows,
        &statin_records,
        &BuildOptions::new().with_generate("statin"),
    )
    .unwrap();

    let merged = merge_sources(
        &[&exposure.episodes, &statin.episodes],
        &MergeOptions::new(),
    )
    .unwrap();
    // Boundaries are the union of both partitions'.
    let p1: Vec<(i64, i64)> = merged
        .episodes
        .iter()
        .filter(|e| e.subject_id == "P1")
        .map(|e| (e.start, e.stop))
        .collect();
    assert_eq!(p1, vec![(0, 50), (50, 100), (100, 150), (150, 300)]);
    let mid = merged.episodes.iter().find(|e| e.start == 100).unwrap();
    assert_eq!(mid.attr("exposure"), Some(&AttrValue::Text("A".into())));
    assert_eq!(mid.attr("statin"), Some(&AttrValue::Text("1".into())));

    let events = vec![tve_model::EventRecord::new("P1").with_primary(120)];
    let options = EventOptions::new().with_time_var("futime", TimeUnit::Days);
    let output = integrate_events(&merged.episodes, &events, &options).unwrap();

    let p1: Vec<(i64, i64, i64)> = output
        .episodes
        .iter()
        .filter(|e| e.subject_id == "P1")
        .map(|e| (e.start, e.stop, e.attr("event").unwrap().as_i64().unwrap()))
        .collect();
    assert_eq!(p1, vec![(0, 50, 0), (50, 100, 0), (100, 120, 1)]);
    let last = output
        .episodes
        .iter()
        .find(|e| e.subject_id == "P1" && e.start == 100)
        .unwrap();
    assert_eq!(last.attr("futime"), Some(&AttrValue::Float(20.0)));

    // P2 has no event date and keeps full follow-up, censored.
    let p2_days: i64 = output
        .episodes
        .iter()
        .filter(|e| e.subject_id == "P2")
        .map(|e| e.duration())
        .sum();
    assert_eq!(p2_days, 300);
    assert_eq!(output.diagnostics.events_by_code.get(&1), Some(&1));
    assert_eq!(output.diagnostics.events_by_code.get(&0), Some(&1));
}

#[test]
fn month_thresholds_split_at_whole_days() {
    // One month is 30.4375 days; the bucket steps at day 31.
    let options = BuildOptions::new().with_mode(EncodingMode::DurationBuckets {
        cuts: vec![1.0],
        unit: TimeUnit::Months,
    });
    let output = build_episodes(
        &[tve_model::ObservationWindow::new("P1", 0, 90)],
        &[tve_model::PeriodRecord::new("P1", 0, 60, "A")],
        &options,
    )
    .unwrap();
    let parts: Vec<(i64, i64, i64)> = output
        .episodes
        .iter()
        .map(|e| (e.start, e.stop, e.attr("exposure").unwrap().as_i64().unwrap()))
        .collect();
    assert_eq!(parts, vec![(0, 31, 1), (31, 60, 2), (60, 90, 2)]);
}

#[test]
fn events_from_iso_table_resolve_competing_risks() {
    let events_df = DataFrame::new(vec![
        Series::new("pid".into(), vec!["P1", "P2"]).into(),
        Series::new("mi".into(), vec![Some("2020-06-01"), None]).into(),
        Series::new("death".into(), vec![Some("2020-03-01"), Some("2020-02-01")]).into(),
    ])
    .unwrap();
    let events = read_events(
        &events_df,
        &EventColumns {
            subject: "pid".into(),
            date: "mi".into(),
            competing: vec!["death".into()],
        },
    )
    .unwrap();

    let windows = vec![
        tve_model::ObservationWindow::new("P1", day("2020-01-01"), day("2020-12-31")),
        tve_model::ObservationWindow::new("P2", day("2020-01-01"), day("2020-12-31")),
    ];
    let built = build_episodes(&windows, &[], &BuildOptions::new()).unwrap();
    let output = integrate_events(&built.episodes, &events, &EventOptions::new()).unwrap();

    // Both subjects end in the competing event (code 2), P1 because death
    // precedes the MI date.
    assert_eq!(output.diagnostics.events_by_code.get(&2), Some(&2));
    let p1_end = output
        .episodes
        .iter()
        .filter(|e| e.subject_id == "P1")
        .map(|e| e.stop)
        .max()
        .unwrap();
    assert_eq!(p1_end, day("2020-03-01"));
}

#[test]
fn point_records_survive_build_and_merge() {
    let windows = vec![tve_model::ObservationWindow::new("P1", 0, 100)];
    let records = vec![tve_model::PeriodRecord::new("P1", 40, 40, "V").with_quantity(5.0)];
    let built = build_episodes(&windows, &records, &BuildOptions::new().with_reference("none"))
        .unwrap();
    assert!(built.episodes.iter().any(|e| e.is_point() && e.start == 40));

    let other = build_episodes(&windows, &[], &BuildOptions::new().with_generate("flag")).unwrap();
    let merged = merge_sources(&[&built.episodes, &other.episodes], &MergeOptions::new()).unwrap();
    let point = merged.episodes.iter().find(|e| e.is_point()).unwrap();
    assert_eq!(point.start, 40);
    assert_eq!(point.attr("exposure"), Some(&AttrValue::Text("V".into())));
}
