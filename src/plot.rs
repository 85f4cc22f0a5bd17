use crate::resample::RasterLayout;
use crate::utils::DynError;
use plotters::prelude::PathElement;
use plotters::prelude::*;

const PLOT_FONT_SCALE: f64 = 1.2;

fn scaled_font_size(base: i32) -> i32 {
    ((base as f64) * PLOT_FONT_SCALE).round() as i32
}

fn scaled_area_size(base: i32) -> i32 {
    ((base as f64) * PLOT_FONT_SCALE).round() as i32
}

/// Blue (0) to red (1).
fn heat_color(t: f64) -> HSLColor {
    let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.0 };
    HSLColor((1.0 - t) * 240.0 / 360.0, 1.0, 0.5)
}

/// Colour heatmap of one power map in raster orientation (row 0 at the top).
pub fn plot_power_heatmap(
    layout: &RasterLayout,
    power: &[f64],
    title: &str,
    filename: &str,
    x_label: &str,
    y_label: &str,
) -> Result<(), DynError> {
    if layout.index.len() != layout.width * layout.height {
        return Err("Raster layout does not cover the image".into());
    }
    if layout.index.is_empty() {
        return Err("No data points to plot".into());
    }
    let max_val = layout
        .index
        .iter()
        .map(|&p| power.get(p).copied().ok_or("Raster index outside the power map"))
        .try_fold(0.0_f64, |acc, v| v.map(|v| acc.max(v)))?;

    let root = BitMapBackend::new(filename, (900, 800)).into_drawing_area();
    root.fill(&WHITE)?;

    let (w, h) = (layout.width as f64, layout.height as f64);
    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", scaled_font_size(24)).into_font())
        .margin(10)
        .x_label_area_size(scaled_area_size(40))
        .y_label_area_size(scaled_area_size(60))
        .build_cartesian_2d(0.0..w, 0.0..h)?;

    chart
        .configure_mesh()
        .disable_mesh()
        .x_desc(x_label)
        .y_desc(y_label)
        .label_style(("sans-serif", scaled_font_size(20)).into_font())
        .axis_desc_style(("sans-serif", scaled_font_size(24)).into_font())
        .draw()?;

    let scale = if max_val > 0.0 { 1.0 / max_val } else { 0.0 };
    chart.draw_series(layout.index.iter().enumerate().map(|(pixel, &point)| {
        let col = (pixel % layout.width) as f64;
        let row = (pixel / layout.width) as f64;
        let top = h - row;
        Rectangle::new(
            [(col, top - 1.0), (col + 1.0, top)],
            heat_color(power[point] * scale).filled(),
        )
    }))?;

    root.present()?;
    Ok(())
}

/// Per-combination peak power with the recommended ceiling drawn as a
/// horizontal line.
pub fn plot_peak_survey(
    peaks: &[f64],
    ceiling: f64,
    filename: &str,
    x_label: &str,
    y_label: &str,
) -> Result<(), DynError> {
    if peaks.is_empty() {
        return Err("No data points to plot".into());
    }

    let root = BitMapBackend::new(filename, (1280, 720)).into_drawing_area();
    root.fill(&WHITE)?;

    let x_max = (peaks.len().max(2) - 1) as f64;
    let y_max = if ceiling > 0.0 { ceiling * 1.05 } else { 1.0 };

    let mut chart = ChartBuilder::on(&root)
        .margin(10)
        .x_label_area_size(scaled_area_size(40))
        .y_label_area_size(scaled_area_size(60))
        .build_cartesian_2d(0.0..x_max, 0.0..y_max)?;

    chart
        .configure_mesh()
        .x_desc(x_label)
        .y_desc(y_label)
        .label_style(("sans-serif", scaled_font_size(20)).into_font())
        .axis_desc_style(("sans-serif", scaled_font_size(24)).into_font())
        .light_line_style(WHITE.mix(0.0))
        .draw()?;

    chart
        .draw_series(LineSeries::new(
            peaks.iter().enumerate().map(|(i, &p)| (i as f64, p)),
            &BLUE,
        ))?
        .label("peak power")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 10, y)], BLUE));

    chart
        .draw_series(LineSeries::new(
            vec![(0.0, ceiling), (x_max, ceiling)],
            &RED,
        ))?
        .label(format!("ceiling {ceiling:.4e}"))
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 10, y)], RED));

    chart
        .configure_series_labels()
        .border_style(BLACK)
        .background_style(&WHITE.mix(0.8))
        .label_font(("sans-serif", scaled_font_size(20)).into_font())
        .draw()?;

    root.present()?;
    Ok(())
}
