use std::io::stdout;

use anyhow::Result;
use chrono::{DateTime, Utc};
use crossterm::execute;
use ratatui::{
    backend::CrosstermBackend,
    style::{Color, Style},
    widgets::{Bar, BarChart, BarGroup, Block},
    Terminal, TerminalOptions, Viewport,
};

use crate::types::BucketResult;

/// Upper bound on drawn bars; longer spans are folded into wider slices.
const MAX_BARS: usize = 48;

/// Peak weighted demand of consecutive minute slices.
#[derive(Debug, Clone, PartialEq)]
pub struct Slice {
    pub start: DateTime<Utc>,
    pub peak: f64,
}

pub fn slice_minutes(total_minutes: usize) -> usize {
    total_minutes.div_ceil(MAX_BARS).max(1)
}

pub fn peak_slices(buckets: &[BucketResult]) -> Vec<Slice> {
    let width = slice_minutes(buckets.len());
    buckets
        .chunks(width)
        .map(|chunk| Slice {
            start: chunk[0].minute,
            peak: chunk
                .iter()
                .map(|b| b.weighted_demand)
                .fold(0.0, f64::max),
        })
        .collect()
}

fn slice_label(start: DateTime<Utc>, width: usize) -> String {
    if width >= 24 * 60 {
        start.format("%m-%d").to_string()
    } else {
        start.format("%H:%M").to_string()
    }
}

pub fn render(buckets: &[BucketResult], capacity_tpm: f64) -> Result<()> {
    let slices = peak_slices(buckets);
    if slices.is_empty() {
        eprintln!("No minutes to display.");
        return Ok(());
    }
    let width = slice_minutes(buckets.len());

    // Label every fourth bar so labels don't collide
    let bars: Vec<Bar> = slices
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let label = if i % 4 == 0 {
                slice_label(s.start, width)
            } else {
                String::new()
            };
            let color = if s.peak > capacity_tpm {
                Color::Red
            } else {
                Color::Cyan
            };
            Bar::default()
                .value(s.peak.round() as u64)
                .text_value(String::new())
                .label(label.into())
                .style(Style::default().fg(color))
        })
        .collect();

    let title = format!(
        "Peak weighted TPM per {width}-minute slice; red exceeds {:.0} TPM capacity",
        capacity_tpm
    );

    let chart = BarChart::default()
        .block(Block::bordered().title(title))
        .data(BarGroup::default().bars(&bars))
        .bar_width(2)
        .bar_gap(1)
        .label_style(Style::default().fg(Color::DarkGray));

    let chart_height: u16 = 17; // 15 for bars + 2 for border

    let mut terminal = Terminal::with_options(
        CrosstermBackend::new(stdout()),
        TerminalOptions {
            viewport: Viewport::Inline(chart_height),
        },
    )?;

    terminal.draw(|frame| {
        frame.render_widget(chart, frame.area());
    })?;

    // Move cursor below the chart
    execute!(stdout(), crossterm::cursor::MoveDown(1))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulate::simulate;
    use crate::types::Request;
    use chrono::{Duration, TimeZone};

    #[test]
    fn slices_fold_long_spans() {
        assert_eq!(slice_minutes(10), 1);
        assert_eq!(slice_minutes(48), 1);
        assert_eq!(slice_minutes(49), 2);
        assert_eq!(slice_minutes(24 * 60), 30);
    }

    #[test]
    fn slice_takes_peak_minute() {
        let start = Utc.with_ymd_and_hms(2025, 8, 18, 0, 0, 0).unwrap();
        let requests: Vec<Request> = (0..100)
            .map(|m| Request {
                timestamp: start + Duration::minutes(m),
                input_tokens: m as u64,
                output_tokens: 0,
                model: None,
            })
            .collect();
        let buckets = simulate(&requests, 1000.0, 1.0).unwrap();
        let slices = peak_slices(&buckets);

        // 100 minutes in 3-minute slices
        assert_eq!(slices.len(), 34);
        assert_eq!(slices[0].peak, 2.0);
        assert_eq!(slices[33].peak, 99.0);
        assert_eq!(slices[1].start, start + Duration::minutes(3));
    }
}
