use egui::Color32;

#[derive(Clone)]
pub enum UiState {
    Loading,
    Error { message: String },
    Display,
}

/// A lap ticked in the lap selector, with the color used for it in every chart.
#[derive(Clone, Debug)]
pub struct LapChoice {
    pub number: u32,
    pub selected: bool,
    pub color: Color32,
}

/// One lap's points for a single chart.
pub struct LapTrace {
    pub number: u32,
    pub color: Color32,
    pub points: Vec<[f64; 2]>,
}
