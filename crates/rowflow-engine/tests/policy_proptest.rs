use proptest::prelude::*;
use rowflow_engine::channel::RowChannel;
use rowflow_engine::config::parser;
use rowflow_engine::config::validator;
use std::time::Duration;

use rowflow_engine::{check_pipeline, run_pipeline, ExecutionOptions, Pipeline};
use rowflow_types::{PipelineStatus, Row, StepStatus, Value};

fn yaml_rows(values: &[i64]) -> String {
    let rows: Vec<String> = values.iter().map(|v| format!("[{v}]")).collect();
    format!("[{}]", rows.join(", "))
}

proptest! {
    #[test]
    fn channel_preserves_fifo(values in proptest::collection::vec(any::<i64>(), 0..200)) {
        let channel = RowChannel::new("p", values.len().max(1));
        for v in &values {
            channel.push(Row::new(vec![Value::Integer(*v)])).unwrap();
        }
        channel.mark_done();
        let popped: Vec<i64> = std::iter::from_fn(|| channel.pop())
            .filter_map(|r| r.get(0).and_then(Value::as_i64))
            .collect();
        prop_assert_eq!(popped, values);
        prop_assert!(channel.pop().is_none());
    }

    #[test]
    fn copies_must_be_positive(copies in 0_u32..4) {
        let yaml = format!(
            r#"
version: "1.0"
pipeline: prop_copies
steps:
  - name: gen
    kind: sequence
    limit: 1
    copies: {copies}
"#
        );
        let config = parser::parse_pipeline_str(&yaml).expect("generated yaml must parse");
        let result = validator::validate_pipeline(&config);
        if copies == 0 {
            prop_assert!(result.is_err());
        } else {
            prop_assert!(result.is_ok());
        }
    }

    #[test]
    fn percent_threshold_must_not_exceed_100(percent in 0_u32..200) {
        let yaml = format!(
            r#"
version: "1.0"
pipeline: prop_percent
steps:
  - name: gen
    kind: sequence
    limit: 1
  - name: check
    kind: validate
    rules: [{{ assert_not_null: id }}]
    error_handling:
      target: bad
      max_percent_errors: {percent}
  - name: bad
    kind: dummy
hops:
  - {{ from: gen, to: check }}
  - {{ from: check, to: bad }}
"#
        );
        let config = parser::parse_pipeline_str(&yaml).expect("generated yaml must parse");
        let result = check_pipeline(&config, &ExecutionOptions::default());
        prop_assert_eq!(result.is_ok(), percent <= 100);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn sorted_merge_output_is_sorted_union(
        mut a in proptest::collection::vec(-50_i64..50, 0..30),
        mut b in proptest::collection::vec(-50_i64..50, 0..30),
        mut c in proptest::collection::vec(-50_i64..50, 0..30),
    ) {
        a.sort_unstable();
        b.sort_unstable();
        c.sort_unstable();
        let yaml = format!(
            r#"
version: "1.0"
pipeline: prop_merge
resources:
  channel_capacity: 3
steps:
  - name: a
    kind: rows
    fields: [{{ name: id, type: integer }}]
    rows: {}
  - name: b
    kind: rows
    fields: [{{ name: id, type: integer }}]
    rows: {}
  - name: c
    kind: rows
    fields: [{{ name: id, type: integer }}]
    rows: {}
  - name: merge
    kind: sorted_merge
    keys: [{{ field: id }}]
  - name: out
    kind: preview
hops:
  - {{ from: a, to: merge }}
  - {{ from: b, to: merge }}
  - {{ from: c, to: merge }}
  - {{ from: merge, to: out }}
"#,
            yaml_rows(&a),
            yaml_rows(&b),
            yaml_rows(&c),
        );
        let config = parser::parse_pipeline_str(&yaml).expect("generated yaml must parse");
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        let result = runtime
            .block_on(run_pipeline(&config, &ExecutionOptions::default()))
            .unwrap();
        prop_assert_eq!(result.status, PipelineStatus::Finished);

        let merged: Vec<i64> = result
            .previews
            .get("out")
            .map(|p| p.rows.iter().filter_map(|r| r.get(0).and_then(Value::as_i64)).collect())
            .unwrap_or_default();
        let mut expected: Vec<i64> = a.iter().chain(&b).chain(&c).copied().collect();
        expected.sort_unstable();
        prop_assert_eq!(merged, expected);
    }
}

const FULL_SPEED: &str = r#"
version: "1.0"
pipeline: full_speed
resources:
  channel_capacity: 16
steps:
  - name: gen
    kind: sequence
  - name: work
    kind: dummy
    copies: 3
  - name: sink
    kind: dummy
hops:
  - { from: gen, to: work }
  - { from: work, to: sink }
"#;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn stop_under_load_terminates(after_ms in 0_u64..40, safe in any::<bool>()) {
        let config = parser::parse_pipeline_str(FULL_SPEED).expect("pipeline must parse");
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        let result = runtime.block_on(async {
            let mut pipeline = Pipeline::prepare(&config, &ExecutionOptions::default()).unwrap();
            let controller = pipeline.controller();
            pipeline.start().unwrap();
            tokio::time::sleep(Duration::from_millis(after_ms)).await;
            if safe {
                controller.safe_stop();
            } else {
                controller.kill_all();
            }
            tokio::time::timeout(Duration::from_secs(10), pipeline.wait_until_finished()).await
        });
        let result = result.expect("stopped pipeline must terminate").unwrap();

        prop_assert_eq!(result.status, PipelineStatus::Stopped);
        prop_assert_eq!(result.errors, 0);
        prop_assert!(result.steps.iter().all(|m| m.status != Some(StepStatus::Failed)));

        if safe {
            let totals = result.step_totals();
            let total = |name: &str| totals.iter().find(|m| m.step == name).cloned().unwrap();
            let (gen, work, sink) = (total("gen"), total("work"), total("sink"));
            prop_assert_eq!(gen.lines_written, work.lines_read);
            prop_assert_eq!(work.lines_written, sink.lines_read);
            prop_assert_eq!(sink.status, Some(StepStatus::Finished));
        }
    }
}
