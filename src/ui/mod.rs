use egui::{Color32, Visuals, style::Widgets};

pub(crate) mod analysis;

pub(crate) const PALETTE_BLACK: Color32 = Color32::from_rgb(12, 12, 12);
pub(crate) const PALETTE_BROWN: Color32 = Color32::from_rgb(72, 30, 20);
pub(crate) const PALETTE_MAROON: Color32 = Color32::from_rgb(155, 57, 34);
pub(crate) const PALETTE_ORANGE: Color32 = Color32::from_rgb(242, 97, 63);

// one color per selected lap, cycling
const LAP_COLORS: [Color32; 10] = [
    Color32::from_rgb(31, 119, 180),
    Color32::from_rgb(255, 127, 14),
    Color32::from_rgb(44, 160, 44),
    Color32::from_rgb(214, 39, 40),
    Color32::from_rgb(148, 103, 189),
    Color32::from_rgb(140, 86, 75),
    Color32::from_rgb(227, 119, 194),
    Color32::from_rgb(127, 127, 127),
    Color32::from_rgb(188, 189, 34),
    Color32::from_rgb(23, 190, 207),
];

pub(crate) fn lap_color(idx: usize) -> Color32 {
    LAP_COLORS[idx % LAP_COLORS.len()]
}

pub(crate) fn default_visuals() -> Visuals {
    Visuals {
        dark_mode: true,
        hyperlink_color: PALETTE_MAROON,
        faint_bg_color: PALETTE_BLACK,
        extreme_bg_color: PALETTE_BROWN,
        panel_fill: PALETTE_BLACK,
        button_frame: true,
        window_fill: PALETTE_BLACK,
        widgets: Widgets::dark(),
        striped: false,
        ..Default::default()
    }
}
