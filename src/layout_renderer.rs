//! Render plan for a photo package and its two HTML targets.
//!
//! The on-screen preview and the print canvas are generated from the same
//! [`RenderPlan`], so switching package or image always updates both.

use serde::Serialize;
use std::fmt::Write;

use crate::package_catalog::{PhotoPackage, SizeClass};

/// What a single cell displays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CellContent {
    Image { version: String },
    Placeholder,
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderCell {
    pub row: usize,
    pub column: usize,
    pub content: CellContent,
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderGroup {
    pub size_class: SizeClass,
    pub columns: usize,
    pub rows: usize,
    pub width_in: f64,
    pub height_in: f64,
    pub cells: Vec<RenderCell>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderPlan {
    pub package_id: &'static str,
    pub package_name: &'static str,
    /// Preview spacing only.
    pub has_gap: bool,
    pub groups: Vec<RenderGroup>,
}

impl RenderPlan {
    /// Builds the grid for `package`. `image_version` is the content hash of
    /// the current working image, or `None` to fill every cell with a
    /// placeholder.
    pub fn build(package: &'static PhotoPackage, image_version: Option<&str>) -> Self {
        let content = match image_version {
            Some(version) => CellContent::Image {
                version: version.to_string(),
            },
            None => CellContent::Placeholder,
        };

        let groups = package
            .layout
            .iter()
            .map(|group| RenderGroup {
                size_class: group.size_class,
                columns: group.columns,
                rows: group.rows(),
                width_in: group.size_class.width_in(),
                height_in: group.size_class.height_in(),
                cells: (0..group.count)
                    .map(|index| RenderCell {
                        row: index / group.columns,
                        column: index % group.columns,
                        content: content.clone(),
                    })
                    .collect(),
            })
            .collect();

        Self {
            package_id: package.id,
            package_name: package.name,
            has_gap: package.has_gap,
            groups,
        }
    }

    pub fn cells(&self) -> impl Iterator<Item = (&RenderGroup, &RenderCell)> {
        self.groups
            .iter()
            .flat_map(|group| group.cells.iter().map(move |cell| (group, cell)))
    }

    pub fn cell_count(&self) -> usize {
        self.groups.iter().map(|g| g.cells.len()).sum()
    }

    pub fn image_cell_count(&self) -> usize {
        self.cells()
            .filter(|(_, cell)| matches!(cell.content, CellContent::Image { .. }))
            .count()
    }
}

pub fn image_url(version: &str) -> String {
    format!("/api/image/current?v={}", version)
}

fn cell_inner(content: &CellContent) -> String {
    match content {
        CellContent::Image { version } => {
            format!(r#"<img src="{}" alt="">"#, image_url(version))
        }
        CellContent::Placeholder => {
            r#"<div class="placeholder" aria-hidden="true">&#9633;</div>"#.to_string()
        }
    }
}

/// Screen preview: flexible grid that scales down with the viewport.
pub fn render_preview(plan: &RenderPlan) -> String {
    let mut html = String::new();
    let _ = write!(
        html,
        r#"<div id="preview-canvas" class="preview-canvas{}" data-package="{}">"#,
        if plan.has_gap { " has-gap" } else { "" },
        plan.package_id
    );

    for group in &plan.groups {
        let _ = write!(
            html,
            r#"<div class="preview-group" style="grid-template-columns: repeat({}, minmax(0, {}fr));">"#,
            group.columns,
            format_number(group.width_in)
        );
        for cell in &group.cells {
            let _ = write!(
                html,
                r#"<div class="preview-cell {}" style="aspect-ratio: {} / {};">{}</div>"#,
                group.size_class.css_class(),
                format_number(group.width_in),
                format_number(group.height_in),
                cell_inner(&cell.content)
            );
        }
        html.push_str("</div>");
    }

    html.push_str("</div>");
    html
}

/// Print canvas: physical sizes come from the print stylesheet classes, so
/// each cell prints at its true size, edge to edge with its neighbours.
pub fn render_print_canvas(plan: &RenderPlan) -> String {
    let mut html = String::new();
    let _ = write!(
        html,
        r#"<div id="print-canvas" class="print-canvas" data-package="{}">"#,
        plan.package_id
    );

    for group in &plan.groups {
        let _ = write!(
            html,
            r#"<div class="print-row-container" style="grid-template-columns: repeat({}, {});">"#,
            group.columns,
            group.size_class.css_width()
        );
        for cell in &group.cells {
            let _ = write!(
                html,
                r#"<div class="print-cell {}">{}</div>"#,
                group.size_class.css_class(),
                cell_inner(&cell.content)
            );
        }
        html.push_str("</div>");
    }

    html.push_str("</div>");
    html
}

fn format_number(value: f64) -> String {
    let formatted = format!("{:.4}", value);
    formatted
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_string()
}
