use serde::Serialize;
use std::fmt;
use std::str::FromStr;

pub const MM_PER_INCH: f64 = 25.4;

/// Usable print width inside an A4 sheet once margins are accounted for.
pub const PRINT_WIDTH_IN: f64 = 8.0;
pub const A4_WIDTH_IN: f64 = 210.0 / MM_PER_INCH;
pub const A4_HEIGHT_IN: f64 = 297.0 / MM_PER_INCH;
pub const PRINT_TOP_PADDING_IN: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeClass {
    #[serde(rename = "2x2")]
    TwoByTwo,
    #[serde(rename = "1x1")]
    OneByOne,
    Passport,
}

impl SizeClass {
    /// Physical cell width in inches.
    pub fn width_in(self) -> f64 {
        match self {
            SizeClass::TwoByTwo => 2.0,
            SizeClass::OneByOne => 1.0,
            SizeClass::Passport => 35.0 / MM_PER_INCH,
        }
    }

    /// Physical cell height in inches.
    pub fn height_in(self) -> f64 {
        match self {
            SizeClass::TwoByTwo => 2.0,
            SizeClass::OneByOne => 1.0,
            SizeClass::Passport => 45.0 / MM_PER_INCH,
        }
    }

    /// CSS length used by the print stylesheet, in the unit the size is defined in.
    pub fn css_width(self) -> &'static str {
        match self {
            SizeClass::TwoByTwo => "2in",
            SizeClass::OneByOne => "1in",
            SizeClass::Passport => "35mm",
        }
    }

    pub fn css_height(self) -> &'static str {
        match self {
            SizeClass::TwoByTwo => "2in",
            SizeClass::OneByOne => "1in",
            SizeClass::Passport => "45mm",
        }
    }

    pub fn css_class(self) -> &'static str {
        match self {
            SizeClass::TwoByTwo => "photo-2x2",
            SizeClass::OneByOne => "photo-1x1",
            SizeClass::Passport => "photo-passport",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SizeClass::TwoByTwo => "2x2",
            SizeClass::OneByOne => "1x1",
            SizeClass::Passport => "passport",
        }
    }
}

impl FromStr for SizeClass {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "2x2" => Ok(SizeClass::TwoByTwo),
            "1x1" => Ok(SizeClass::OneByOne),
            "passport" => Ok(SizeClass::Passport),
            _ => Err(()),
        }
    }
}

impl fmt::Display for SizeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PhotoGroup {
    pub size_class: SizeClass,
    pub count: usize,
    pub columns: usize,
}

impl PhotoGroup {
    pub const fn new(size_class: SizeClass, count: usize, columns: usize) -> Self {
        Self {
            size_class,
            count,
            columns,
        }
    }

    pub fn rows(&self) -> usize {
        self.count.div_ceil(self.columns)
    }

    /// Widest printed row of the group. Print cells always touch.
    pub fn row_width_in(&self) -> f64 {
        self.columns.min(self.count) as f64 * self.size_class.width_in()
    }

    pub fn height_in(&self) -> f64 {
        self.rows() as f64 * self.size_class.height_in()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PhotoPackage {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub layout: &'static [PhotoGroup],
    /// Spaces the cells apart in the screen preview. Print is edge to edge.
    pub has_gap: bool,
}

impl PhotoPackage {
    pub fn total_cells(&self) -> usize {
        self.layout.iter().map(|g| g.count).sum()
    }

    /// True when every group's widest row stays inside the usable print width.
    pub fn fits_print_width(&self) -> bool {
        // Small epsilon: mm-based sizes do not land on exact binary fractions
        self.layout
            .iter()
            .all(|g| g.row_width_in() <= PRINT_WIDTH_IN + 1e-9)
    }

    /// Height of the stacked groups including the top safety padding.
    pub fn sheet_height_in(&self) -> f64 {
        PRINT_TOP_PADDING_IN + self.layout.iter().map(PhotoGroup::height_in).sum::<f64>()
    }

    pub fn fits_sheet_height(&self) -> bool {
        self.sheet_height_in() <= A4_HEIGHT_IN
    }
}

static CATALOG: [PhotoPackage; 5] = [
    PhotoPackage {
        id: "starter-mix",
        name: "Starter Mix",
        description: "Four 2x2 photos and eight 1x1 photos on one A4 sheet.",
        layout: &[
            PhotoGroup::new(SizeClass::TwoByTwo, 4, 4),
            PhotoGroup::new(SizeClass::OneByOne, 8, 8),
        ],
        has_gap: true,
    },
    PhotoPackage {
        id: "max-1x1",
        name: "Max 1x1",
        description: "Sixteen 1x1 photos printed edge to edge.",
        layout: &[PhotoGroup::new(SizeClass::OneByOne, 16, 8)],
        has_gap: false,
    },
    PhotoPackage {
        id: "max-2x2",
        name: "Max 2x2",
        description: "Eight 2x2 photos printed edge to edge.",
        layout: &[PhotoGroup::new(SizeClass::TwoByTwo, 8, 4)],
        has_gap: false,
    },
    PhotoPackage {
        id: "passport-pack",
        name: "Passport Pack",
        description: "Eight passport photos (35 x 45 mm) printed edge to edge.",
        layout: &[PhotoGroup::new(SizeClass::Passport, 8, 4)],
        has_gap: false,
    },
    PhotoPackage {
        id: "passport-mix",
        name: "Passport Mix",
        description: "Four passport photos and eight 1x1 photos.",
        layout: &[
            PhotoGroup::new(SizeClass::Passport, 4, 4),
            PhotoGroup::new(SizeClass::OneByOne, 8, 4),
        ],
        has_gap: true,
    },
];

pub const DEFAULT_PACKAGE_ID: &str = "starter-mix";

pub fn catalog() -> &'static [PhotoPackage] {
    &CATALOG
}

pub fn find_package(id: &str) -> Option<&'static PhotoPackage> {
    CATALOG.iter().find(|p| p.id == id)
}

pub fn default_package() -> &'static PhotoPackage {
    &CATALOG[0]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_every_package_fits_print_width() {
        for package in catalog() {
            assert!(
                package.fits_print_width(),
                "{} is wider than {} in",
                package.id,
                PRINT_WIDTH_IN
            );
        }
    }

    #[test]
    fn test_every_package_fits_a4_height() {
        for package in catalog() {
            assert!(package.fits_sheet_height(), "{} is too tall", package.id);
        }
    }

    #[test]
    fn test_groups_are_positive() {
        for package in catalog() {
            assert!(!package.layout.is_empty());
            for group in package.layout {
                assert!(group.count > 0);
                assert!(group.columns > 0);
            }
        }
    }

    #[test]
    fn test_package_ids_are_unique() {
        let ids: HashSet<_> = catalog().iter().map(|p| p.id).collect();
        assert_eq!(ids.len(), catalog().len());
    }

    #[test]
    fn test_starter_mix_shape() {
        let package = find_package("starter-mix").unwrap();
        assert_eq!(package.name, "Starter Mix");
        assert_eq!(package.total_cells(), 12);
        assert_eq!(package.layout[0].size_class, SizeClass::TwoByTwo);
        assert_eq!(package.layout[0].count, 4);
        assert_eq!(package.layout[1].size_class, SizeClass::OneByOne);
        assert_eq!(package.layout[1].count, 8);
        assert_eq!(default_package().id, DEFAULT_PACKAGE_ID);
    }

    #[test]
    fn test_starter_mix_prints_one_full_row_per_size() {
        let package = find_package("starter-mix").unwrap();
        for group in package.layout {
            assert_eq!(group.rows(), 1);
            assert!((group.row_width_in() - PRINT_WIDTH_IN).abs() < 1e-9);
        }
        assert!((package.sheet_height_in() - 3.5).abs() < 1e-9);
    }

    #[test]
    fn test_rows_round_up() {
        let group = PhotoGroup::new(SizeClass::OneByOne, 9, 4);
        assert_eq!(group.rows(), 3);
        assert_eq!(PhotoGroup::new(SizeClass::OneByOne, 8, 8).rows(), 1);
    }

    #[test]
    fn test_tight_packages_fill_exact_width() {
        let max = find_package("max-1x1").unwrap();
        assert!((max.layout[0].row_width_in() - 8.0).abs() < 1e-9);
    }

    #[test]
    fn test_too_wide_group_is_detected() {
        let wide = PhotoPackage {
            id: "wide",
            name: "Wide",
            description: "",
            layout: &[PhotoGroup {
                size_class: SizeClass::TwoByTwo,
                count: 5,
                columns: 5,
            }],
            has_gap: false,
        };
        assert!(!wide.fits_print_width());

        // Preview spacing never counts against the print width
        let gapped = PhotoPackage {
            layout: &[PhotoGroup {
                size_class: SizeClass::TwoByTwo,
                count: 4,
                columns: 4,
            }],
            has_gap: true,
            ..wide
        };
        assert!(gapped.fits_print_width());
    }

    #[test]
    fn test_size_class_strings() {
        assert_eq!("2x2".parse::<SizeClass>(), Ok(SizeClass::TwoByTwo));
        assert_eq!("passport".parse::<SizeClass>(), Ok(SizeClass::Passport));
        assert_eq!("3x3".parse::<SizeClass>(), Err(()));
        assert_eq!(format!("{}", SizeClass::OneByOne), "1x1");
        assert_eq!(SizeClass::Passport.css_width(), "35mm");
        assert_eq!(SizeClass::Passport.css_height(), "45mm");
    }

    #[test]
    fn test_unknown_package() {
        assert!(find_package("does-not-exist").is_none());
    }
}
