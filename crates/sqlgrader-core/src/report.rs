use sqlgrader_types::{parse_csv, EvalRun};

const COMPARISON_MAX_ROWS: usize = 50;
const RAW_FALLBACK_MAX_CHARS: usize = 2000;

/// Everything one side-by-side comparison panel shows.
#[derive(Debug, Clone, Copy)]
pub struct Comparison<'a> {
    pub question: &'a str,
    pub reference_sql: &'a str,
    pub agent_sql: Option<&'a str>,
    pub expected_csv: &'a str,
    pub agent_csv: Option<&'a str>,
    pub answer_quality_score: Option<f64>,
    pub answer_quality_reasoning: Option<&'a str>,
}

pub const TABLE_CSS: &str = r#"<style>
.compare-table { font-size: 12px; border-collapse: collapse; width: 100%;
                 color: #000; background: #fff; }
.compare-table th { background: #f0f0f0; color: #000; padding: 6px 8px; text-align: left;
                    border-bottom: 2px solid #ddd; white-space: nowrap; }
.compare-table td { padding: 4px 8px; border-bottom: 1px solid #eee; color: #000; }
</style>"#;

/// Green at 0.8 and above, yellow at 0.5 and above, red below.
pub fn score_color(score: f64) -> &'static str {
    if score >= 0.8 {
        "#22c55e"
    } else if score >= 0.5 {
        "#eab308"
    } else {
        "#ef4444"
    }
}

fn score_badge(label: &str, score: Option<f64>, reasoning: Option<&str>) -> String {
    let Some(score) = score else {
        return String::new();
    };
    let mut badge = format!(
        r#"<div style="display:block;margin-right:16px;"><span style="background:{};color:#fff;padding:4px 10px;border-radius:4px;font-weight:600;font-size:14px;">{}: {:.2}</span>"#,
        score_color(score),
        label,
        score
    );
    if let Some(reasoning) = reasoning.filter(|r| !r.is_empty()) {
        badge.push_str(&format!(
            r#"<div style="color:#000;font-size:12px;margin-top:4px;">{}</div>"#,
            html_escape(reasoning)
        ));
    }
    badge.push_str("</div>");
    badge
}

fn sql_panel(title: &str, sql: Option<&str>) -> String {
    let content = match sql.filter(|s| !s.is_empty()) {
        Some(sql) => html_escape(sql),
        None => "<em>No SQL</em>".to_string(),
    };
    format!(
        r#"<div style="flex:1;min-width:0;"><h4 style="margin:0 0 8px 0;font-size:14px;color:#000;">{}</h4><pre style="background:#fff;padding:12px;border-radius:6px;color:#000;overflow-x:auto;font-size:12px;line-height:1.5;margin:0;border:1px solid #ddd;white-space:pre-wrap;word-break:break-word;">{}</pre></div>"#,
        title, content
    )
}

fn table_panel(title: &str, csv: Option<&str>) -> String {
    let inner = match csv.filter(|s| !s.is_empty()) {
        None => r#"<em style="color:#999;">No output</em>"#.to_string(),
        Some(csv) => csv_to_html_table(csv, COMPARISON_MAX_ROWS).unwrap_or_else(|| {
            let head: String = csv.chars().take(RAW_FALLBACK_MAX_CHARS).collect();
            format!(r#"<pre style="font-size:12px;">{}</pre>"#, html_escape(&head))
        }),
    };
    format!(
        r#"<div style="flex:1;min-width:0;overflow-x:auto;"><h4 style="margin:0 0 8px 0;font-size:14px;color:#000;">{}</h4>{}</div>"#,
        title, inner
    )
}

/// HTML table of the header and first `max_rows` rows, or `None` when the
/// text does not parse as CSV.
pub fn csv_to_html_table(csv: &str, max_rows: usize) -> Option<String> {
    let records = parse_csv(csv).ok()?;
    let (header, rows) = records.split_first()?;

    let mut html = String::from(r#"<table class="compare-table"><thead><tr>"#);
    for h in header {
        html.push_str(&format!("<th>{}</th>", html_escape(h)));
    }
    html.push_str("</tr></thead><tbody>");
    for row in rows.iter().take(max_rows) {
        html.push_str("<tr>");
        for cell in row {
            html.push_str(&format!("<td>{}</td>", html_escape(cell)));
        }
        html.push_str("</tr>");
    }
    html.push_str("</tbody></table>");
    Some(html)
}

/// Reference vs agent, SQL on top and result tables below.
pub fn render_comparison(c: &Comparison<'_>) -> String {
    let mut parts: Vec<String> = Vec::new();

    parts.push(
        r#"<div style="background:#fff;border:1px solid #ddd;border-radius:8px;padding:20px;margin-bottom:24px;font-family:system-ui,sans-serif;color:#000;">"#
            .to_string(),
    );
    parts.push(format!(
        r#"<div style="font-size:15px;font-weight:600;margin-bottom:12px;color:#000;">{}</div>"#,
        html_escape(c.question)
    ));

    let badge = score_badge("Answer Quality", c.answer_quality_score, c.answer_quality_reasoning);
    if !badge.is_empty() {
        parts.push(format!(r#"<div style="margin-bottom:16px;">{}</div>"#, badge));
    }

    parts.push(r#"<div style="display:flex;gap:16px;margin-bottom:20px;">"#.to_string());
    parts.push(sql_panel("Reference SQL", Some(c.reference_sql)));
    parts.push(sql_panel("Agent SQL", c.agent_sql));
    parts.push("</div>".to_string());

    parts.push(r#"<div style="display:flex;gap:16px;">"#.to_string());
    parts.push(table_panel("Expected Output", Some(c.expected_csv)));
    parts.push(table_panel("Agent Output", c.agent_csv));
    parts.push("</div>".to_string());

    parts.push("</div>".to_string());
    parts.join("\n")
}

/// Standalone page: summary cards for the run averages, then one comparison
/// panel per example.
pub fn generate_html_report(run: &EvalRun) -> String {
    let mut panels = String::new();
    for case in &run.cases {
        let sc = &case.scorecard;
        panels.push_str(&format!(
            r#"<div class="case-meta">{} • {} • efficiency {:.2} • SQL validity {:.2} • recovery {:.2} • {:.1}s</div>"#,
            html_escape(&sc.id),
            sc.difficulty,
            sc.tool_efficiency,
            sc.sql_validity,
            sc.error_recovery,
            sc.elapsed_secs
        ));
        panels.push_str(&render_comparison(&Comparison {
            question: &case.example.question,
            reference_sql: &case.example.reference_sql,
            agent_sql: sc.agent_sql.as_deref(),
            expected_csv: &case.example.expected_answer,
            agent_csv: sc.agent_csv.as_deref(),
            answer_quality_score: Some(sc.answer_quality_score),
            answer_quality_reasoning: Some(&sc.answer_quality_reasoning),
        }));
        panels.push('\n');
    }

    let s = &run.summary;
    let card = |label: &str, value: f64| {
        format!(
            r#"<div class="summary-item"><div class="summary-label">{}</div><div class="summary-value" style="color:{};">{:.2}</div></div>"#,
            label,
            score_color(value),
            value
        )
    };

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>SQL Agent Eval Report</title>
    {}
    <style>
        * {{ box-sizing: border-box; }}
        body {{
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, 'Helvetica Neue', Arial, sans-serif;
            margin: 0;
            padding: 20px;
            background: #f5f5f5;
        }}
        .container {{
            max-width: 1400px;
            margin: 0 auto;
            background: white;
            padding: 30px;
            border-radius: 8px;
            box-shadow: 0 2px 8px rgba(0,0,0,0.1);
        }}
        h1 {{ margin: 0 0 10px 0; color: #333; }}
        .timestamp {{ color: #6c757d; font-size: 14px; margin-bottom: 20px; }}
        .summary {{
            display: flex;
            gap: 20px;
            margin: 20px 0 30px 0;
            padding: 20px;
            background: #f8f9fa;
            border-radius: 6px;
        }}
        .summary-item {{ flex: 1; }}
        .summary-label {{
            font-size: 12px;
            color: #666;
            text-transform: uppercase;
            letter-spacing: 0.5px;
            margin-bottom: 5px;
        }}
        .summary-value {{ font-size: 28px; font-weight: 600; color: #333; }}
        .case-meta {{ font-size: 12px; color: #6c757d; margin: 0 0 6px 4px; }}
    </style>
</head>
<body>
    <div class="container">
        <h1>SQL Agent Eval Report</h1>
        <div class="timestamp">Generated: {}</div>
        <div class="summary">
            <div class="summary-item"><div class="summary-label">Examples</div><div class="summary-value">{}</div></div>
            {}
            {}
            {}
            {}
            <div class="summary-item"><div class="summary-label">Total Time</div><div class="summary-value">{:.0}s</div></div>
        </div>
        {}
    </div>
</body>
</html>"#,
        TABLE_CSS,
        chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
        s.total,
        card("Answer Quality", s.avg_answer_quality),
        card("SQL Validity", s.avg_sql_validity),
        card("Efficiency", s.avg_tool_efficiency),
        card("Recovery", s.avg_error_recovery),
        s.total_elapsed_secs,
        panels
    )
}

pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlgrader_types::{CaseResult, Difficulty, Example, RunSummary, Scorecard};

    fn comparison<'a>(agent_csv: Option<&'a str>, score: Option<f64>) -> Comparison<'a> {
        Comparison {
            question: "Orders per store?",
            reference_sql: "SELECT store, COUNT(*) FROM orders WHERE a < b GROUP BY 1",
            agent_sql: Some("SELECT store, COUNT(*) AS n FROM orders GROUP BY store"),
            expected_csv: "store,count\nBaner,12\n",
            agent_csv,
            answer_quality_score: score,
            answer_quality_reasoning: Some("Same rows, renamed column"),
        }
    }

    #[test]
    fn badge_color_tiers() {
        assert_eq!(score_color(0.8), "#22c55e");
        assert_eq!(score_color(0.79), "#eab308");
        assert_eq!(score_color(0.5), "#eab308");
        assert_eq!(score_color(0.49), "#ef4444");
    }

    #[test]
    fn comparison_escapes_sql_and_renders_tables() {
        let html = render_comparison(&comparison(Some("store,n\nBaner,12\n"), Some(0.9)));
        assert!(html.contains("WHERE a &lt; b"));
        assert!(html.contains("<th>store</th><th>count</th>"));
        assert!(html.contains("<td>Baner</td><td>12</td>"));
        assert!(html.contains("Answer Quality: 0.90"));
        assert!(html.contains("#22c55e"));
        assert!(html.contains("Same rows, renamed column"));
    }

    #[test]
    fn comparison_without_score_has_no_badge() {
        let html = render_comparison(&comparison(None, None));
        assert!(!html.contains("Answer Quality"));
        assert!(html.contains("No output"));
    }

    #[test]
    fn unparseable_csv_falls_back_to_escaped_text() {
        let html = render_comparison(&comparison(Some("a,b\n<1>,2,3\n"), Some(0.1)));
        assert!(html.contains(r#"<pre style="font-size:12px;">a,b"#));
        assert!(html.contains("&lt;1&gt;,2,3"));
    }

    #[test]
    fn table_capped_at_max_rows() {
        let csv = std::iter::once("n".to_string())
            .chain((0..60).map(|i| i.to_string()))
            .collect::<Vec<_>>()
            .join("\n");
        let html = csv_to_html_table(&csv, 50).unwrap();
        assert_eq!(html.matches("<td>").count(), 50);
        assert!(html.contains("<td>49</td>"));
        assert!(!html.contains("<td>50</td>"));
    }

    #[test]
    fn run_report_includes_every_case() {
        let example = Example::new("q1", "How many stores?", "SELECT COUNT(*) FROM stores", "n\n4\n", Difficulty::Easy);
        let scorecard = Scorecard {
            id: "q1".into(),
            difficulty: Difficulty::Easy,
            answer_quality_score: 1.0,
            answer_quality_reasoning: "exact".into(),
            sql_validity: 1.0,
            tool_efficiency: 0.5,
            error_recovery: 1.0,
            agent_sql: Some("SELECT COUNT(*) FROM stores".into()),
            agent_csv: Some("n\n4\n".into()),
            answer: "4".into(),
            elapsed_secs: 2.3,
            agent_error: false,
        };
        let summary = RunSummary::from_scorecards(std::slice::from_ref(&scorecard)).unwrap();
        let run = EvalRun { cases: vec![CaseResult { example, scorecard }], summary };

        let html = generate_html_report(&run);
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("How many stores?"));
        assert!(html.contains("q1 • easy • efficiency 0.50"));
        assert!(html.contains("compare-table"));
    }
}
