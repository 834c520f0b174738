//! Prometheus text exposition format.

use crate::watch::WatchStats;

/// Render watch statistics into Prometheus text format, one GAUGE family
/// per statistic with a `watch` label.
pub fn render_prometheus(stats: &[WatchStats]) -> String {
    let mut out = String::new();

    out.push_str("# HELP provgrid_watch_count Recordings since start.\n");
    out.push_str("# TYPE provgrid_watch_count counter\n");
    for s in stats {
        out.push_str(&format!(
            "provgrid_watch_count{{watch=\"{}\"}} {}\n",
            s.name, s.count
        ));
    }

    let gauges: [(&str, &str, fn(&WatchStats) -> f64); 4] = [
        ("mean_ms", "Mean elapsed time in milliseconds.", |s| s.mean_ms),
        ("max_ms", "Maximum elapsed time in milliseconds.", |s| s.max_ms),
        ("p50_ms", "P50 elapsed time in milliseconds.", |s| s.p50_ms),
        ("p99_ms", "P99 elapsed time in milliseconds.", |s| s.p99_ms),
    ];

    for (suffix, help, value) in gauges {
        out.push_str(&format!("# HELP provgrid_watch_{suffix} {help}\n"));
        out.push_str(&format!("# TYPE provgrid_watch_{suffix} gauge\n"));
        for s in stats {
            out.push_str(&format!(
                "provgrid_watch_{suffix}{{watch=\"{}\"}} {:.3}\n",
                s.name,
                value(s)
            ));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(name: &str) -> WatchStats {
        WatchStats {
            name: name.to_string(),
            count: 42,
            mean_ms: 12.5,
            min_ms: 1.0,
            max_ms: 80.0,
            p50_ms: 10.0,
            p99_ms: 75.25,
        }
    }

    #[test]
    fn renders_all_families() {
        let output = render_prometheus(&[stats("provision")]);

        assert!(output.contains("# TYPE provgrid_watch_count counter"));
        assert!(output.contains("provgrid_watch_count{watch=\"provision\"} 42"));
        assert!(output.contains("provgrid_watch_mean_ms{watch=\"provision\"} 12.500"));
        assert!(output.contains("provgrid_watch_max_ms{watch=\"provision\"} 80.000"));
        assert!(output.contains("provgrid_watch_p50_ms{watch=\"provision\"} 10.000"));
        assert!(output.contains("provgrid_watch_p99_ms{watch=\"provision\"} 75.250"));
    }

    #[test]
    fn one_line_per_watch() {
        let output = render_prometheus(&[stats("provision"), stats("allocation")]);
        let lines = output
            .lines()
            .filter(|l| l.starts_with("provgrid_watch_p99_ms"))
            .count();
        assert_eq!(lines, 2);
    }

    #[test]
    fn empty_input_has_only_headers() {
        let output = render_prometheus(&[]);
        assert!(output.lines().all(|l| l.starts_with('#')));
    }
}
