use crate::indicators::Action;
use crate::rsi_scanner::{InstrumentOutcome, NoDataReason, ScanReport};
use comfy_table::{
    Attribute, Cell, CellAlignment, Color, ContentArrangement, Table, modifiers::UTF8_ROUND_CORNERS,
    presets::UTF8_BORDERS_ONLY,
};

fn format_opt(value: Option<f64>) -> String {
    value.map(|v| format!("{:.2}", v)).unwrap_or_else(|| "N/A".to_string())
}

/// RSI report as a table: scored instruments first, lowest RSI on top,
/// then the ones without a score.
pub fn render(report: &ScanReport) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_BORDERS_ONLY)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Asset").add_attribute(Attribute::Bold),
            Cell::new("Date").add_attribute(Attribute::Bold),
            Cell::new("Close")
                .add_attribute(Attribute::Bold)
                .set_alignment(CellAlignment::Right),
            Cell::new("RSI")
                .add_attribute(Attribute::Bold)
                .set_alignment(CellAlignment::Right),
            Cell::new("Action").add_attribute(Attribute::Bold),
        ]);

    let mut scored: Vec<_> = report.scored().collect();
    scored.sort_by(|a, b| {
        let ra = a.1.rsi.unwrap_or(f64::INFINITY);
        let rb = b.1.rsi.unwrap_or(f64::INFINITY);
        ra.total_cmp(&rb).then_with(|| a.0.cmp(b.0))
    });

    for (symbol, latest, action) in scored {
        let action_color = match action {
            Action::OpenTheEyes => Color::Green,
            Action::Wait => Color::DarkGrey,
        };
        table.add_row(vec![
            Cell::new(symbol).fg(Color::Cyan),
            Cell::new(latest.date.format("%d-%m-%Y")).fg(Color::DarkGrey),
            Cell::new(format!("{:.2}", latest.close)).set_alignment(CellAlignment::Right),
            Cell::new(format_opt(latest.rsi)).set_alignment(CellAlignment::Right),
            Cell::new(action).fg(action_color),
        ]);
    }

    for instrument in &report.instruments {
        let note = match &instrument.outcome {
            InstrumentOutcome::Scored { .. } => continue,
            InstrumentOutcome::NoData(NoDataReason::EmptySeries) => "no data".to_string(),
            InstrumentOutcome::NoData(NoDataReason::Insufficient { actual }) => {
                format!("no data ({} sessions)", actual)
            }
            InstrumentOutcome::FetchFailed(_) => "fetch failed".to_string(),
        };
        table.add_row(vec![
            Cell::new(&instrument.symbol).fg(Color::DarkGrey),
            Cell::new(""),
            Cell::new(""),
            Cell::new(""),
            Cell::new(note).fg(Color::Red),
        ]);
    }

    table
}

pub fn print(report: &ScanReport) {
    if report.instruments.is_empty() {
        println!("No data found.");
        return;
    }
    println!("\n{}", render(report));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::IndicatorRow;
    use crate::rsi_scanner::InstrumentReport;
    use chrono::NaiveDate;

    fn scored(symbol: &str, rsi: f64, action: Action) -> InstrumentReport {
        InstrumentReport {
            symbol: symbol.to_string(),
            outcome: InstrumentOutcome::Scored {
                latest: IndicatorRow {
                    date: NaiveDate::from_ymd_opt(2024, 1, 25).unwrap(),
                    close: 100.0,
                    gain: Some(0.0),
                    loss: Some(1.0),
                    average_gain: Some(1.0),
                    average_loss: Some(1.0),
                    rs: Some(1.0),
                    rsi: Some(rsi),
                },
                action,
            },
        }
    }

    #[test]
    fn lowest_rsi_is_listed_first() {
        let report = ScanReport {
            instruments: vec![
                scored("HIGH", 70.0, Action::Wait),
                InstrumentReport {
                    symbol: "LOST".into(),
                    outcome: InstrumentOutcome::FetchFailed("boom".into()),
                },
                scored("LOW", 31.0, Action::OpenTheEyes),
            ],
        };
        let rendered = render(&report).to_string();
        let low = rendered.find("LOW").unwrap();
        let high = rendered.find("HIGH").unwrap();
        let lost = rendered.find("LOST").unwrap();
        assert!(low < high && high < lost);
        assert!(rendered.contains("Open the eyes"));
        assert!(rendered.contains("fetch failed"));
        assert!(rendered.contains("25-01-2024"));
    }
}
