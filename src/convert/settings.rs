//! Print geometry: paper formats, margins, scale and page selection.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::cdp::page::{PrintToPdfParams, TransferMode};
use crate::error::{CdpError, Result};

/// Paper sizes resolvable to concrete inch dimensions, plus
/// [`PaperFormat::FitPageToContent`] which defers sizing to the page's own
/// CSS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaperFormat {
    Letter,
    Legal,
    Tabloid,
    Ledger,
    A0,
    A1,
    A2,
    A3,
    A4,
    A5,
    A6,
    FitPageToContent,
}

impl PaperFormat {
    /// Width and height in inches. ISO sizes are millimetres divided by
    /// 25.4, rounded to 6 decimal places. `None` for
    /// [`PaperFormat::FitPageToContent`].
    pub fn dimensions(&self) -> Option<(f64, f64)> {
        match self {
            PaperFormat::Letter => Some((8.5, 11.0)),
            PaperFormat::Legal => Some((8.5, 14.0)),
            PaperFormat::Tabloid => Some((11.0, 17.0)),
            PaperFormat::Ledger => Some((17.0, 11.0)),
            PaperFormat::A0 => Some((33.110236, 46.811024)),
            PaperFormat::A1 => Some((23.385827, 33.110236)),
            PaperFormat::A2 => Some((16.535433, 23.385827)),
            PaperFormat::A3 => Some((11.692913, 16.535433)),
            PaperFormat::A4 => Some((8.267717, 11.692913)),
            PaperFormat::A5 => Some((5.826772, 8.267717)),
            PaperFormat::A6 => Some((4.133858, 5.826772)),
            PaperFormat::FitPageToContent => None,
        }
    }
}

impl FromStr for PaperFormat {
    type Err = CdpError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "letter" => Ok(PaperFormat::Letter),
            "legal" => Ok(PaperFormat::Legal),
            "tabloid" => Ok(PaperFormat::Tabloid),
            "ledger" => Ok(PaperFormat::Ledger),
            "a0" => Ok(PaperFormat::A0),
            "a1" => Ok(PaperFormat::A1),
            "a2" => Ok(PaperFormat::A2),
            "a3" => Ok(PaperFormat::A3),
            "a4" => Ok(PaperFormat::A4),
            "a5" => Ok(PaperFormat::A5),
            "a6" => Ok(PaperFormat::A6),
            "fit" | "fitpagetocontent" => Ok(PaperFormat::FitPageToContent),
            other => Err(CdpError::Config(format!("unknown paper format: {other}"))),
        }
    }
}

impl fmt::Display for PaperFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PaperFormat::Letter => "Letter",
            PaperFormat::Legal => "Legal",
            PaperFormat::Tabloid => "Tabloid",
            PaperFormat::Ledger => "Ledger",
            PaperFormat::A0 => "A0",
            PaperFormat::A1 => "A1",
            PaperFormat::A2 => "A2",
            PaperFormat::A3 => "A3",
            PaperFormat::A4 => "A4",
            PaperFormat::A5 => "A5",
            PaperFormat::A6 => "A6",
            PaperFormat::FitPageToContent => "FitPageToContent",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    #[default]
    Portrait,
    Landscape,
}

/// The print geometry for one conversion. All lengths are inches.
///
/// A set `paper_format` wins over the explicit `paper_width`/`paper_height`
/// pair; `FitPageToContent` instead turns on `preferCSSPageSize` and sends
/// no dimensions at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageSettings {
    pub orientation: Orientation,
    pub paper_format: Option<PaperFormat>,
    pub paper_width: f64,
    pub paper_height: f64,
    pub margin_top: f64,
    pub margin_bottom: f64,
    pub margin_left: f64,
    pub margin_right: f64,
    pub scale: f64,
    pub print_background: bool,
    pub display_header_footer: bool,
    pub header_template: Option<String>,
    pub footer_template: Option<String>,
    /// Selection string using the syntax `N[-M](,N[-M])*`.
    pub page_ranges: Option<String>,
    pub ignore_invalid_page_ranges: bool,
    pub prefer_css_page_size: bool,
    pub generate_tagged_pdf: bool,
    pub generate_outline: bool,
}

impl Default for PageSettings {
    fn default() -> Self {
        Self {
            orientation: Orientation::Portrait,
            paper_format: None,
            paper_width: 8.5,
            paper_height: 11.0,
            margin_top: 0.4,
            margin_bottom: 0.4,
            margin_left: 0.4,
            margin_right: 0.4,
            scale: 1.0,
            print_background: false,
            display_header_footer: false,
            header_template: None,
            footer_template: None,
            page_ranges: None,
            ignore_invalid_page_ranges: false,
            prefer_css_page_size: false,
            generate_tagged_pdf: false,
            generate_outline: false,
        }
    }
}

impl PageSettings {
    pub fn with_format(format: PaperFormat) -> Self {
        Self {
            paper_format: Some(format),
            ..Default::default()
        }
    }

    /// The dimensions `Page.printToPDF` will be given, or `None` when the
    /// page's CSS decides.
    fn resolved_dimensions(&self) -> Option<(f64, f64)> {
        match self.paper_format {
            Some(format) => format.dimensions(),
            None => Some((self.paper_width, self.paper_height)),
        }
    }

    /// Whether the PDF page should shrink-wrap the rendered content.
    pub fn fit_page_to_content(&self) -> bool {
        matches!(self.paper_format, Some(PaperFormat::FitPageToContent))
    }

    /// Check the geometry invariants: positive dimensions, non-negative
    /// margins that leave printable space, scale in `(0, 10]`.
    pub fn validate(&self) -> Result<()> {
        if [
            self.margin_top,
            self.margin_bottom,
            self.margin_left,
            self.margin_right,
        ]
        .iter()
        .any(|m| !m.is_finite() || *m < 0.0)
        {
            return Err(CdpError::Config("margins must be >= 0".into()));
        }
        if !self.scale.is_finite() || self.scale <= 0.0 || self.scale > 10.0 {
            return Err(CdpError::Config(format!(
                "scale {} out of range (0, 10]",
                self.scale
            )));
        }
        if let Some((width, height)) = self.resolved_dimensions() {
            if !(width > 0.0 && height > 0.0) {
                return Err(CdpError::Config(format!(
                    "paper dimensions must be positive, got {width}x{height}"
                )));
            }
            if self.margin_top + self.margin_bottom >= height {
                return Err(CdpError::Config(
                    "top and bottom margins leave no printable height".into(),
                ));
            }
            if self.margin_left + self.margin_right >= width {
                return Err(CdpError::Config(
                    "left and right margins leave no printable width".into(),
                ));
            }
        }
        Ok(())
    }

    /// Width available to content after horizontal margins, when known.
    pub fn printable_width(&self) -> Option<f64> {
        self.resolved_dimensions()
            .map(|(w, _)| w - self.margin_left - self.margin_right)
    }

    /// The 1:1 wire mapping. `transfer_mode` is left to the caller.
    pub fn to_print_params(&self) -> Result<PrintToPdfParams> {
        self.validate()?;
        let mut params = PrintToPdfParams {
            landscape: Some(self.orientation == Orientation::Landscape),
            display_header_footer: Some(self.display_header_footer),
            print_background: Some(self.print_background),
            scale: Some(self.scale),
            margin_top: Some(self.margin_top),
            margin_bottom: Some(self.margin_bottom),
            margin_left: Some(self.margin_left),
            margin_right: Some(self.margin_right),
            header_template: self.header_template.clone(),
            footer_template: self.footer_template.clone(),
            transfer_mode: Some(TransferMode::ReturnAsStream),
            generate_tagged_pdf: Some(self.generate_tagged_pdf),
            generate_document_outline: Some(self.generate_outline),
            ..Default::default()
        };
        match self.resolved_dimensions() {
            Some((width, height)) => {
                params.paper_width = Some(width);
                params.paper_height = Some(height);
                params.prefer_css_page_size = Some(self.prefer_css_page_size);
            }
            // FitPageToContent: no dimensions, the page's CSS decides.
            None => params.prefer_css_page_size = Some(true),
        }
        if let Some(ranges) = &self.page_ranges {
            params.page_ranges = filter_page_ranges(ranges, self.ignore_invalid_page_ranges);
        }
        Ok(params)
    }
}

/// Apply the `N[-M](,N[-M])*` grammar to a page-range string.
///
/// With `ignore_invalid` set, descending (`N > M`) and unparsable pieces
/// are silently dropped; without it the string is forwarded untouched and
/// the browser rejects it.
pub fn filter_page_ranges(ranges: &str, ignore_invalid: bool) -> Option<String> {
    if !ignore_invalid {
        return Some(ranges.to_string());
    }
    let kept: Vec<&str> = ranges
        .split(',')
        .map(str::trim)
        .filter(|piece| range_is_valid(piece))
        .collect();
    if kept.is_empty() {
        None
    } else {
        Some(kept.join(","))
    }
}

fn range_is_valid(piece: &str) -> bool {
    let mut bounds = piece.splitn(2, '-');
    let start = match bounds.next().map(str::parse::<u32>) {
        Some(Ok(n)) if n > 0 => n,
        _ => return false,
    };
    match bounds.next() {
        None => true,
        Some(end) => match end.parse::<u32>() {
            Ok(m) => start <= m,
            Err(_) => false,
        },
    }
}
