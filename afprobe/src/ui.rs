/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under either of
 *
 * * Apache License, Version 2.0
 *   (http://www.apache.org/licenses/LICENSE-2.0)
 * * MIT license
 *   (http://opensource.org/licenses/MIT)
 *
 * at your option.
 *
 * Unless you explicitly state otherwise, any contribution intentionally
 * submitted for inclusion in the work by you, as defined in the Apache-2.0
 * license, shall be dual licensed as above, without any additional terms or
 * conditions.
 */

//! Terminal rendering of probe frames. Pure view code: everything shown
//! here arrives precomputed in a [`ProbeFrame`].

use ratatui::layout::{Constraint, Layout, Rect};
use ratatui::style::{Color, Style};
use ratatui::symbols;
use ratatui::widgets::{Axis, Block, Borders, Chart, Dataset, Gauge, GraphType, Paragraph, Sparkline};
use ratatui::Frame;

use crate::observer::ProbeFrame;

pub fn draw(f: &mut Frame, probe: &ProbeFrame) {
    let [waves, spectra, meters, stats] = Layout::vertical([
        Constraint::Percentage(40),
        Constraint::Percentage(30),
        Constraint::Length(3),
        Constraint::Min(4),
    ])
    .areas(f.area());

    let [left, right] = Layout::horizontal([Constraint::Percentage(50), Constraint::Percentage(50)])
        .areas(waves);
    waveform(f, left, "Left channel", &probe.left, Color::LightBlue);
    waveform(f, right, "Right channel", &probe.right, Color::LightCyan);

    let [spec, ceps] = Layout::horizontal([Constraint::Percentage(60), Constraint::Percentage(40)])
        .areas(spectra);
    spectrum(f, spec, &probe.spectrum_db);
    cepstrum(f, ceps, &probe.cepstrum);

    let [rms_l, rms_r] = Layout::horizontal([Constraint::Percentage(50), Constraint::Percentage(50)])
        .areas(meters);
    rms_gauge(f, rms_l, "RMS L", probe.rms_db[0]);
    rms_gauge(f, rms_r, "RMS R", probe.rms_db[1]);

    stats_pane(f, stats, probe);
}

fn waveform(f: &mut Frame, area: Rect, title: &str, samples: &[i16], color: Color) {
    let points: Vec<(f64, f64)> = samples
        .iter()
        .enumerate()
        .map(|(i, &s)| (i as f64, s as f64 / 32768.0))
        .collect();
    let dataset = Dataset::default()
        .marker(symbols::Marker::Braille)
        .graph_type(GraphType::Line)
        .style(Style::default().fg(color))
        .data(&points);
    let chart = Chart::new(vec![dataset])
        .block(Block::default().title(title).borders(Borders::ALL))
        .x_axis(Axis::default().bounds([0.0, samples.len().max(1) as f64]))
        .y_axis(
            Axis::default()
                .bounds([-1.0, 1.0])
                .labels(["-1.0", "\u{b1}0.0", "+1.0"]),
        );
    f.render_widget(chart, area);
}

fn spectrum(f: &mut Frame, area: Rect, spectrum_db: &[f32]) {
    // Compress the bins to the visible width, keeping the loudest of each
    // group, and lift dBFS into a positive bar height.
    let width = area.width.saturating_sub(2).max(1) as usize;
    let bars: Vec<u64> = if spectrum_db.is_empty() {
        vec![0; width]
    } else {
        (0..width)
            .map(|i| {
                let lo = i * spectrum_db.len() / width;
                let hi = ((i + 1) * spectrum_db.len() / width).max(lo + 1);
                let peak = spectrum_db[lo..hi.min(spectrum_db.len())]
                    .iter()
                    .fold(f32::MIN, |a, &b| a.max(b));
                (peak + 100.0).max(0.0) as u64
            })
            .collect()
    };
    let sparkline = Sparkline::default()
        .block(
            Block::default()
                .title("STFT magnitude (dB)")
                .borders(Borders::ALL),
        )
        .style(Style::default().fg(Color::Yellow))
        .max(100)
        .data(&bars);
    f.render_widget(sparkline, area);
}

fn cepstrum(f: &mut Frame, area: Rect, cepstrum: &[f32]) {
    let width = area.width.saturating_sub(2).max(1) as usize;
    let peak = cepstrum.iter().fold(1e-6f32, |a, &b| a.max(b));
    let bars: Vec<u64> = if cepstrum.is_empty() {
        vec![0; width]
    } else {
        (0..width)
            .map(|i| {
                let lo = i * cepstrum.len() / width;
                let hi = ((i + 1) * cepstrum.len() / width).max(lo + 1);
                let group = cepstrum[lo..hi.min(cepstrum.len())]
                    .iter()
                    .fold(0.0f32, |a, &b| a.max(b));
                (group / peak * 100.0) as u64
            })
            .collect()
    };
    let sparkline = Sparkline::default()
        .block(Block::default().title("Cepstrum").borders(Borders::ALL))
        .style(Style::default().fg(Color::Magenta))
        .max(100)
        .data(&bars);
    f.render_widget(sparkline, area);
}

fn rms_gauge(f: &mut Frame, area: Rect, title: &str, db: f32) {
    // -60 dBFS..0 dBFS mapped onto the gauge.
    let ratio = ((db + 60.0) / 60.0).clamp(0.0, 1.0) as f64;
    let gauge = Gauge::default()
        .block(Block::default().title(title).borders(Borders::ALL))
        .gauge_style(Style::default().fg(level_color(db)))
        .ratio(ratio)
        .label(format!("{db:5.1} dBFS"));
    f.render_widget(gauge, area);
}

fn level_color(db: f32) -> Color {
    if db > -6.0 {
        Color::Red
    } else if db > -20.0 {
        Color::Green
    } else {
        Color::DarkGray
    }
}

fn stats_pane(f: &mut Frame, area: Rect, probe: &ProbeFrame) {
    let mut lines = Vec::new();
    match probe.sender {
        Some(token) => lines.push(format!(
            "watching sender {token} ({} ch); press q to quit",
            probe.channels
        )),
        None => lines.push("waiting for datagrams; press q to quit".to_string()),
    }
    for s in &probe.stats {
        lines.push(format!(
            "sender {:>3}  loss {:5.1}%  jitter {:7.0} us  send intv {:7.0} us  recv intv {:7.0} us",
            s.token, s.lost_rate, s.jitter_us, s.send_interval_us, s.recv_interval_us
        ));
    }
    let paragraph = Paragraph::new(lines.join("\n"))
        .block(Block::default().title("Link statistics").borders(Borders::ALL));
    f.render_widget(paragraph, area);
}
