//! Knitting modes and line sequencing
//!
//! Each mode describes one machine topology: how many carriage passes one
//! pattern row takes, where blank lines fall, and which color each pass
//! carries. The sequencer maps an absolute line number to the
//! (color, row, blank, last) tuple the needle selector and the wire reply
//! are built from.
//!
//! The middle-colors-twice and heart-of-pluto arithmetic reproduces the
//! behavior the deployed firmware expects; it is validated against literal
//! vectors rather than derived.

use serde::{Deserialize, Serialize};

/// Knitting topology selected for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Single bed, both yarns knitted in one pass
    Singlebed,
    /// Double bed, classic color exchange
    ClassicRibber,
    /// Double bed, middle colors knitted twice per row
    MiddleColorsTwiceRibber,
    /// Double bed, rotating middle colors
    HeartOfPlutoRibber,
    /// Double bed, circular (tubular) knitting
    CircularRibber,
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Singlebed
    }
}

impl Mode {
    /// Carriage passes needed to knit one pattern row.
    pub fn row_multiplier(self, ncolors: usize) -> usize {
        match self {
            Mode::Singlebed => 1,
            // every second line is blank
            Mode::ClassicRibber if ncolors > 2 => 2 * ncolors,
            Mode::CircularRibber => 2 * ncolors,
            // only middle lines doubled
            Mode::MiddleColorsTwiceRibber | Mode::HeartOfPlutoRibber => 2 * ncolors - 2,
            // one line per color
            _ => ncolors,
        }
    }

    /// Whether `ncolors` is a workable color count for this mode.
    pub fn good_ncolors(self, ncolors: usize) -> bool {
        match self {
            Mode::Singlebed | Mode::CircularRibber => ncolors == 2,
            // no maximum
            _ => ncolors >= 2,
        }
    }

    /// Whether the needles flanking the pattern must knit the background
    /// color on this pass.
    pub fn flanking_needles(self, color: usize, _ncolors: usize) -> bool {
        color == 0
    }
}

/// What the sequencer decided for one requested line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineSpec {
    /// Yarn color of this pass
    pub color: usize,
    /// Index into the expanded pattern rows
    pub row_index: usize,
    /// Pattern row this pass belongs to (after repeat reduction)
    pub pat_row: usize,
    /// Knit no stitches on this pass
    pub blank_line: bool,
    /// This pass completes the pattern
    pub last_line: bool,
}

/// Line sequencing parameters, fixed for the duration of a session.
#[derive(Debug, Clone, Copy)]
pub struct Sequencer {
    /// Knitting topology
    pub mode: Mode,
    /// Number of colors in the quantized pattern
    pub num_colors: usize,
    /// Pattern height in rows
    pub pat_height: usize,
    /// First pattern row to knit
    pub start_row: usize,
    /// Repeat the pattern indefinitely
    pub inf_repeat: bool,
}

impl Sequencer {
    fn len_expanded(&self) -> usize {
        self.num_colors * self.pat_height
    }

    /// Decide color, row and flags for an absolute requested line number.
    pub fn line(&self, line_number: usize) -> LineSpec {
        match self.mode {
            Mode::Singlebed => self.singlebed(line_number),
            Mode::ClassicRibber if self.num_colors == 2 => self.classic_ribber_2col(line_number),
            Mode::ClassicRibber => self.classic_ribber_multicol(line_number),
            Mode::MiddleColorsTwiceRibber => self.middle_colors_twice(line_number),
            Mode::HeartOfPlutoRibber => self.heart_of_pluto(line_number),
            Mode::CircularRibber => self.circular_ribber(line_number),
        }
    }

    // single bed, 2 colors, one pass per row
    fn singlebed(&self, line_number: usize) -> LineSpec {
        let mut line_number = line_number + self.start_row;

        // when knitting infinitely, wrap the line number
        if self.inf_repeat {
            line_number %= self.pat_height;
        }
        let pat_row = line_number;

        // 0   1   2   3   4 .. (pat_row)
        // |   |   |   |   |
        // 0 1 2 3 4 5 6 7 8 .. (row_index)

        // both colors are knitted at once, so the color is always 0
        LineSpec {
            color: 0,
            row_index: 2 * pat_row,
            pat_row,
            blank_line: false,
            last_line: pat_row + 1 == self.pat_height,
        }
    }

    // double bed, 2 colors, 4-line swap cycle
    fn classic_ribber_2col(&self, line_number: usize) -> LineSpec {
        let mut line_number = line_number + 2 * self.start_row;

        let i = line_number % 4;

        if self.inf_repeat {
            line_number %= self.len_expanded();
        }
        let pat_row = line_number / 2;

        // 0 0 1 1 2 2 3 3 4 4 .. (pat_row)
        // 0 1 2 3 4 5 6 7 8 9 .. (line_number)
        // | |  X  | |  X  | |
        // 0 1 3 2 4 5 7 6 8 9 .. (row_index)
        // A B B A A B B A A B .. (color)

        let color = [0, 1, 1, 0][i];
        let offset = [0, 0, 1, -1][i];
        let row_index =
            (line_number as i64 + offset).rem_euclid(self.len_expanded() as i64) as usize;

        LineSpec {
            color,
            row_index,
            pat_row,
            blank_line: false,
            last_line: pat_row + 1 == self.pat_height && (i == 1 || i == 3),
        }
    }

    // double bed, multicolor, every second line blank
    fn classic_ribber_multicol(&self, line_number: usize) -> LineSpec {
        let blank_line = line_number % 2 == 1;
        let mut h = line_number / 2;

        h += self.num_colors * self.start_row;

        if self.inf_repeat {
            h %= self.len_expanded();
        }

        let pat_row = h / self.num_colors;
        let color = h % self.num_colors;
        let row_index = pat_row * self.num_colors + color;

        LineSpec {
            color,
            row_index,
            pat_row,
            blank_line,
            last_line: row_index + 1 == self.len_expanded() && blank_line,
        }
    }

    // double bed, multicolor, middle colors twice
    fn middle_colors_twice(&self, line_number: usize) -> LineSpec {
        // 0-00 1-11 2-22 3-33 4-44 5-55 .. (pat_row)
        // 0123 4567 8911 1111 1111 2222 .. (line_number)
        //             01 2345 6789 0123
        //
        // 0-21 4-53 6-87 1-19 1-11 1-11 .. (row_index)
        //                0 1  2 43 6 75
        //
        // A-CB B-CA A-CB B-CA A-CB B-CA .. (color)

        let passes = self.mode.row_multiplier(self.num_colors);
        let line_number = line_number + passes * self.start_row;

        let mut pat_row = line_number / passes;
        let r = line_number % passes;

        let first_pass = r == 0;
        let last_pass = r == passes - 1;

        let color = if first_pass || last_pass {
            (usize::from(last_pass) + pat_row) % 2
        } else {
            (r + 3) / 2
        };

        if self.inf_repeat {
            pat_row %= self.pat_height;
        }

        LineSpec {
            color,
            row_index: self.num_colors * pat_row + color,
            pat_row,
            blank_line: !first_pass && !last_pass && line_number % 2 == 1,
            last_line: pat_row + 1 == self.pat_height && last_pass,
        }
    }

    // double bed, multicolor, rotating middle colors
    fn heart_of_pluto(&self, line_number: usize) -> LineSpec {
        // 0000 1111 2222 3333 4444 5555 .. (pat_row)
        // 0123 4567 8911 1111 1111 2222 .. (line_number)
        //             01 2345 6789 0123
        //
        // 02-1 35-4 76-8 11-9 11-1 11-1 .. (row_index)
        //                10   24 3 65 7
        //
        // CB-A AC-B BA-C CB-A AC-B BA-C .. (color)

        let passes = self.mode.row_multiplier(self.num_colors);
        let line_number = line_number + passes * self.start_row;

        let mut pat_row = line_number / passes;
        let r = line_number % passes;

        if self.inf_repeat {
            pat_row %= self.pat_height;
        }

        let first_pass = r == 0;
        let last_pass = r == passes - 1;

        let color = self.num_colors - 1 - ((line_number + 1) % (2 * self.num_colors)) / 2;

        LineSpec {
            color,
            row_index: self.num_colors * pat_row + color,
            pat_row,
            blank_line: !first_pass && !last_pass && line_number % 2 == 0,
            last_line: pat_row + 1 == self.pat_height && last_pass,
        }
    }

    // double bed, circular: every color on both beds, every second line blank
    fn circular_ribber(&self, line_number: usize) -> LineSpec {
        // A B  A B  A B  .. (color)
        // 0-0- 1-1- 2-2- .. (pat_row)
        // 0 1  2 3  4 5  .. (row_index)
        // 0123 4567 8911 .. (line_number)
        //             01

        let blank_line = line_number % 2 == 1;
        let mut h = line_number / 2;

        h += self.num_colors * self.start_row;

        if self.inf_repeat {
            h %= self.len_expanded();
        }

        LineSpec {
            color: h % self.num_colors,
            row_index: h,
            pat_row: h / self.num_colors,
            blank_line,
            last_line: h + 1 == self.len_expanded() && blank_line,
        }
    }
}
