use std::str::FromStr;

use anyhow::Result;
use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

/// Weekdays in the order they're written in filenames and summaries, with the numeric codes
/// upstream tools use (1 = Sunday through 7 = Saturday).
pub const WEEKDAYS: [(Weekday, &str); 7] = [
    (Weekday::Sun, "SUN"),
    (Weekday::Mon, "MON"),
    (Weekday::Tue, "TUE"),
    (Weekday::Wed, "WED"),
    (Weekday::Thu, "THU"),
    (Weekday::Fri, "FRI"),
    (Weekday::Sat, "SAT"),
];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaysOfWeek {
    pub monday: bool,
    pub tuesday: bool,
    pub wednesday: bool,
    pub thursday: bool,
    pub friday: bool,
    pub saturday: bool,
    pub sunday: bool,
}

impl DaysOfWeek {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Self {
            monday: true,
            tuesday: true,
            wednesday: true,
            thursday: true,
            friday: true,
            saturday: true,
            sunday: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::none()
    }

    fn slot(&mut self, day: Weekday) -> &mut bool {
        match day {
            Weekday::Mon => &mut self.monday,
            Weekday::Tue => &mut self.tuesday,
            Weekday::Wed => &mut self.wednesday,
            Weekday::Thu => &mut self.thursday,
            Weekday::Fri => &mut self.friday,
            Weekday::Sat => &mut self.saturday,
            Weekday::Sun => &mut self.sunday,
        }
    }

    pub fn insert(&mut self, day: Weekday) {
        *self.slot(day) = true;
    }

    pub fn contains(&self, day: Weekday) -> bool {
        match day {
            Weekday::Mon => self.monday,
            Weekday::Tue => self.tuesday,
            Weekday::Wed => self.wednesday,
            Weekday::Thu => self.thursday,
            Weekday::Fri => self.friday,
            Weekday::Sat => self.saturday,
            Weekday::Sun => self.sunday,
        }
    }

    pub fn includes(&self, day: &NaiveDate) -> bool {
        self.contains(day.weekday())
    }

    /// Like "SUN-TUE-SAT", or "UNK" if no days are set.
    pub fn abbreviations(&self) -> String {
        let days: Vec<&str> = WEEKDAYS
            .iter()
            .filter(|(day, _)| self.contains(*day))
            .map(|(_, abbrev)| *abbrev)
            .collect();
        if days.is_empty() {
            return "UNK".to_string();
        }
        days.join("-")
    }
}

impl FromStr for DaysOfWeek {
    type Err = anyhow::Error;

    /// Accepts a comma-separated list of abbreviations ("MON,TUE"), numeric codes ("2,3"), or the
    /// shortcuts "all", "weekdays" and "weekends".
    fn from_str(input: &str) -> Result<Self> {
        let mut result = Self::none();
        for token in input.split(',') {
            let token = token.trim().to_ascii_uppercase();
            if token.is_empty() {
                continue;
            }
            match token.as_str() {
                "ALL" => {
                    return Ok(Self::all());
                }
                "WEEKDAYS" => {
                    for (day, _) in &WEEKDAYS[1..6] {
                        result.insert(*day);
                    }
                    continue;
                }
                "WEEKENDS" => {
                    result.insert(Weekday::Sat);
                    result.insert(Weekday::Sun);
                    continue;
                }
                _ => {}
            }

            if let Ok(code) = token.parse::<usize>() {
                if !(1..=7).contains(&code) {
                    bail!("Weekday code {code} isn't between 1 (SUN) and 7 (SAT)");
                }
                result.insert(WEEKDAYS[code - 1].0);
            } else if let Some((day, _)) = WEEKDAYS.iter().find(|(_, abbrev)| *abbrev == token) {
                result.insert(*day);
            } else {
                bail!("Unknown weekday {token}");
            }
        }
        if result.is_empty() {
            bail!("No weekdays in {input:?}");
        }
        Ok(result)
    }
}
