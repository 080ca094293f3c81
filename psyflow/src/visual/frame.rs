// Copyright (c) 2024 Marc Pabst
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use super::color::Rgba;

/// A draw command in window coordinates (origin lower left, y up).
#[derive(Debug, Clone, PartialEq)]
pub enum DrawCommand {
    Rect {
        lower_left: [f64; 2],
        size: [f64; 2],
        color: Rgba,
    },
    Text {
        lower_left: [f64; 2],
        text: String,
        font_name: String,
        font_size: f64,
        color: Rgba,
    },
}

/// Everything drawn onto one screen during one tick.
///
/// Stimuli draw in the coordinates of their viewport; the frame translates
/// them by the viewport origin.
#[derive(Debug, Clone)]
pub struct Frame {
    pub bg_color: Rgba,
    origin: [f64; 2],
    commands: Vec<DrawCommand>,
}

impl Frame {
    pub fn new(bg_color: Rgba) -> Self {
        Self {
            bg_color,
            origin: [0.0, 0.0],
            commands: Vec::new(),
        }
    }

    /// Sets the window position of the viewport currently drawing.
    pub fn set_origin(&mut self, origin: [f64; 2]) {
        self.origin = origin;
    }

    fn translate(&self, point: [f64; 2]) -> [f64; 2] {
        [point[0] + self.origin[0], point[1] + self.origin[1]]
    }

    /// Draws a filled rectangle given its center in viewport coordinates.
    pub fn draw_rect(&mut self, center: [f64; 2], size: [f64; 2], color: Rgba) {
        let lower_left = self.translate([center[0] - size[0] / 2.0, center[1] - size[1] / 2.0]);
        self.commands.push(DrawCommand::Rect {
            lower_left,
            size,
            color,
        });
    }

    pub fn draw_text(&mut self, lower_left: [f64; 2], text: &str, font_name: &str, font_size: f64, color: Rgba) {
        self.commands.push(DrawCommand::Text {
            lower_left: self.translate(lower_left),
            text: text.to_string(),
            font_name: font_name.to_string(),
            font_size,
            color,
        });
    }

    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_are_translated_by_the_origin() {
        let white = Rgba::new(1.0, 1.0, 1.0, 1.0);
        let mut frame = Frame::new(Rgba::new(0.0, 0.0, 0.0, 1.0));
        frame.set_origin([100.0, 50.0]);
        frame.draw_rect([10.0, 10.0], [4.0, 4.0], white);
        assert_eq!(
            frame.commands(),
            &[DrawCommand::Rect {
                lower_left: [108.0, 58.0],
                size: [4.0, 4.0],
                color: white
            }]
        );
    }
}
