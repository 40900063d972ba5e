//! SVG renderings of the CFD analysis and the filter spectrum of selected events.
use crate::{
    cfd::CfdAnalysis,
    filter::FilteredWaveform,
    parameters::AnalysisSettings,
    processing::{EventRecord, EventSink},
};
use hrppd_common::{
    Real,
    metrics::{
        failures::{self, FailureKind},
        metric_names::FAILURES,
    },
};
use metrics::counter;
use miette::IntoDiagnostic;
use plotters::{
    chart::{ChartBuilder, ChartContext},
    coord::{Shift, types::RangedCoordf64},
    prelude::{Cartesian2d, Circle, DrawingArea, IntoDrawingArea, PathElement, SVGBackend},
    series::{LineSeries, PointSeries},
    style::{BLACK, BLUE, Color, IntoFont, RED, ShapeStyle, WHITE},
};
use std::{
    fs::create_dir_all,
    io,
    ops::Range,
    path::{Path, PathBuf},
};
use tracing::{instrument, warn};

/// Points the spline is sampled at across the fit range.
const SPLINE_STEPS: usize = 200;
const IMAGE_SIZE: (u32, u32) = (1024, 640);

type MyDrawingArea<'a> = DrawingArea<SVGBackend<'a>, Shift>;
type MyChartContext<'a> =
    ChartContext<'a, SVGBackend<'a>, Cartesian2d<RangedCoordf64, RangedCoordf64>>;

/// Widens a range that would otherwise be degenerate, and pads it by a tenth.
fn padded(min: Real, max: Real) -> Range<Real> {
    let (min, max) = if max > min {
        (min, max)
    } else {
        (min - 1.0, max + 1.0)
    };
    let margin = (max - min) / 10.0;
    (min - margin)..(max + margin)
}

trait MyBuilder<'a>: Sized {
    fn build_graph(
        root: &MyDrawingArea<'a>,
        caption: &str,
        x: Range<Real>,
        y: Range<Real>,
        x_desc: &str,
        y_desc: &str,
    ) -> miette::Result<Self>;
    fn draw_line(&mut self, points: Vec<(Real, Real)>, style: ShapeStyle, label: &str)
    -> miette::Result<()>;
    fn draw_points(&mut self, points: Vec<(Real, Real)>, style: ShapeStyle, label: &str)
    -> miette::Result<()>;
}

impl<'a> MyBuilder<'a> for MyChartContext<'a> {
    #[instrument(skip_all, level = "debug")]
    fn build_graph(
        root: &MyDrawingArea<'a>,
        caption: &str,
        x: Range<Real>,
        y: Range<Real>,
        x_desc: &str,
        y_desc: &str,
    ) -> miette::Result<MyChartContext<'a>> {
        let mut chart = ChartBuilder::on(root)
            .x_label_area_size(40)
            .y_label_area_size(60)
            .margin(10)
            .caption(caption, ("sans-serif", 30.0).into_font())
            .build_cartesian_2d(x, y)
            .into_diagnostic()?;

        chart
            .configure_mesh()
            .disable_x_mesh()
            .disable_y_mesh()
            .x_desc(x_desc)
            .y_desc(y_desc)
            .draw()
            .into_diagnostic()?;

        Ok(chart)
    }

    fn draw_line(
        &mut self,
        points: Vec<(Real, Real)>,
        style: ShapeStyle,
        label: &str,
    ) -> miette::Result<()> {
        self.draw_series(LineSeries::new(points, style))
            .into_diagnostic()?
            .label(label)
            .legend(move |(x, y)| PathElement::new(vec![(x - 10, y), (x + 10, y)], style));
        Ok(())
    }

    fn draw_points(
        &mut self,
        points: Vec<(Real, Real)>,
        style: ShapeStyle,
        label: &str,
    ) -> miette::Result<()> {
        let ps: PointSeries<_, _, Circle<_, _>, _> = PointSeries::new(points, 3, style);
        self.draw_series(ps)
            .into_diagnostic()?
            .label(label)
            .legend(move |(x, y)| Circle::new((x, y), 3, style));
        Ok(())
    }
}

fn finish_chart(chart: &mut MyChartContext<'_>, root: &MyDrawingArea<'_>) -> miette::Result<()> {
    chart
        .configure_series_labels()
        .background_style(WHITE)
        .border_style(BLACK)
        .draw()
        .into_diagnostic()?;
    root.present().into_diagnostic()
}

/// Draws the CFD signal over the search window with the spline fitted to it
/// and the crossing found on it.
#[instrument(skip_all, level = "debug", fields(path = %path.display()))]
pub fn save_cfd_svg(analysis: &CfdAnalysis, title: &str, path: &Path) -> miette::Result<()> {
    let start = analysis.window.start.min(analysis.fit_low);
    let end = analysis.window.end.max(analysis.fit_high + 1);
    let signal: Vec<_> = (start..end.min(analysis.signal.len()))
        .filter_map(|i| Some((analysis.sample_time(i), *analysis.signal.get(i)?)))
        .collect();
    let knots: Vec<_> = analysis.spline.knots().collect();
    let curve = analysis.spline_curve(SPLINE_STEPS);
    let crossing = (analysis.crossing, analysis.spline.eval(analysis.crossing));

    let (x_min, x_max) = (analysis.sample_time(start), analysis.sample_time(end));
    let (y_min, y_max) = signal
        .iter()
        .chain(&curve)
        .fold((0.0, 0.0), |(min, max): (Real, Real), &(_, y)| {
            (min.min(y), max.max(y))
        });

    let root = SVGBackend::new(path, IMAGE_SIZE).into_drawing_area();
    root.fill(&WHITE).into_diagnostic()?;
    let mut chart = MyChartContext::build_graph(
        &root,
        title,
        x_min..x_max,
        padded(y_min, y_max),
        "Time (ps)",
        "CFD signal (mV)",
    )?;

    chart.draw_line(vec![(x_min, 0.0), (x_max, 0.0)], ShapeStyle::from(&BLACK), "zero")?;
    chart.draw_line(signal, ShapeStyle::from(&BLUE), "signal")?;
    chart.draw_points(knots, BLACK.filled(), "fit points")?;
    chart.draw_line(curve, ShapeStyle::from(&RED), "spline")?;
    chart.draw_points(vec![crossing], RED.filled(), &format!("crossing {:.1} ps", crossing.0))?;
    finish_chart(&mut chart, &root)
}

/// Draws the magnitude spectrum before and after the low-pass filter.
#[instrument(skip_all, level = "debug", fields(path = %path.display()))]
pub fn save_spectrum_svg(
    filtered: &FilteredWaveform,
    bin_width: Real,
    title: &str,
    path: &Path,
) -> miette::Result<()> {
    let in_ghz = |spectrum: &[Real]| -> Vec<(Real, Real)> {
        spectrum
            .iter()
            .enumerate()
            .map(|(k, &db)| (k as Real * bin_width / 1e9, db))
            .collect()
    };
    let before = in_ghz(&filtered.spectrum_before);
    let after = in_ghz(&filtered.spectrum_after);
    let x_max = before.last().map_or(1.0, |&(f, _)| f);
    let (y_min, y_max) = before
        .iter()
        .chain(&after)
        .fold((Real::MAX, Real::MIN), |(min, max), &(_, y)| {
            (min.min(y), max.max(y))
        });

    let root = SVGBackend::new(path, IMAGE_SIZE).into_drawing_area();
    root.fill(&WHITE).into_diagnostic()?;
    let mut chart = MyChartContext::build_graph(
        &root,
        title,
        0.0..x_max,
        padded(y_min.min(y_max), y_max),
        "Frequency (GHz)",
        "Magnitude (dB)",
    )?;
    chart.draw_line(before, ShapeStyle::from(&BLUE), "before")?;
    chart.draw_line(after, ShapeStyle::from(&RED), "after")?;
    finish_chart(&mut chart, &root)
}

/// Renders the first valid events of a run into a directory.
#[derive(Debug)]
pub struct DiagnosticsWriter {
    directory: PathBuf,
    remaining: usize,
    bin_width: Real,
}

impl DiagnosticsWriter {
    pub fn new(directory: &Path, settings: &AnalysisSettings) -> io::Result<Self> {
        create_dir_all(directory)?;
        Ok(Self {
            directory: directory.to_owned(),
            remaining: settings.diagnostic_events,
            bin_width: settings.sampling_rate / hrppd_common::SAMPLES_PER_EVENT as Real,
        })
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }

    fn save(&self, record: &EventRecord) -> miette::Result<()> {
        let event = record.event_index;
        if let Some(analysis) = &record.trigger_analysis {
            save_cfd_svg(
                analysis,
                &format!("Event {event} trigger"),
                &self.directory.join(format!("event{event}_trigger.svg")),
            )?;
        }
        if let Some(analysis) = &record.channel_analysis {
            let channel = record.channel;
            save_cfd_svg(
                analysis,
                &format!("Event {event} channel {channel}"),
                &self.directory.join(format!("event{event}_channel{channel}.svg")),
            )?;
        }
        if let Some(filtered) = &record.filtered {
            save_spectrum_svg(
                filtered,
                self.bin_width,
                &format!("Event {event} spectrum"),
                &self.directory.join(format!("event{event}_spectrum.svg")),
            )?;
        }
        Ok(())
    }
}

impl EventSink for DiagnosticsWriter {
    /// Rendering failures are logged and counted but never end the run.
    fn accept(&mut self, record: &EventRecord) -> io::Result<()> {
        if self.remaining == 0 || !record.decision.valid {
            return Ok(());
        }
        self.remaining -= 1;
        if let Err(e) = self.save(record) {
            warn!("Cannot save diagnostics for event {}: {e}", record.event_index);
            counter!(
                FAILURES,
                &[failures::get_label(FailureKind::FileWriteFailed)]
            )
            .increment(1);
        }
        Ok(())
    }
}
