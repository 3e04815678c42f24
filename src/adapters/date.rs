//! Date and date-time adapter.
//!
//! The parameter map only ever holds the selection as UTC epoch milliseconds
//! rendered as a decimal string. Time of day survives only for `DateTime`
//! variables; plain dates are pinned to midnight UTC.
//!
//! Text-driven hosts type ISO forms. Bare numbers other than a compact
//! `YYYYMMDD` date are rejected rather than read as timestamps:
//!
//! | Input                   | Accepted for      |
//! |-------------------------|-------------------|
//! | `20240301`              | Date, DateTime    |
//! | `2024-03-01`            | Date, DateTime    |
//! | `2024-03-01T09:30`      | Date, DateTime    |
//! | `2024-03-01T09:30:00Z`  | Date, DateTime    |

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use form_types::{FieldChange, VariableDescriptor};

use super::{
    join_classes, AdapterContext, FieldPhase, FieldView, InputAdapter, UserInput, Validator,
};

// ---------------------------------------------------------------------------
// CalendarSelection
// ---------------------------------------------------------------------------

/// One picked day, with a time of day when the picker allows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarSelection {
    pub date: NaiveDate,
    pub time: Option<NaiveTime>,
}

impl CalendarSelection {
    pub fn date(date: NaiveDate) -> Self {
        Self { date, time: None }
    }

    pub fn at(date: NaiveDate, time: NaiveTime) -> Self {
        Self {
            date,
            time: Some(time),
        }
    }

    /// Interpret epoch milliseconds as UTC; `None` when out of range.
    pub fn from_epoch_millis(millis: i64, enable_time: bool) -> Option<Self> {
        let moment = DateTime::from_timestamp_millis(millis)?.naive_utc();
        Some(Self {
            date: moment.date(),
            time: enable_time.then(|| moment.time()),
        })
    }

    pub fn to_epoch_millis(&self, enable_time: bool) -> i64 {
        let time = match self.time {
            Some(time) if enable_time => time,
            _ => NaiveTime::MIN,
        };
        self.date.and_time(time).and_utc().timestamp_millis()
    }
}

/// Parse typed text into epoch milliseconds.
fn parse_typed(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if let Ok(moment) = DateTime::parse_from_rfc3339(raw) {
        return Some(moment.timestamp_millis());
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"] {
        if let Ok(moment) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(moment.and_utc().timestamp_millis());
        }
    }
    let date = if raw.len() == 8 && raw.bytes().all(|b| b.is_ascii_digit()) {
        NaiveDate::from_ymd_opt(
            raw[..4].parse().ok()?,
            raw[4..6].parse().ok()?,
            raw[6..].parse().ok()?,
        )
    } else {
        NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
    };
    date.map(|date| CalendarSelection::date(date).to_epoch_millis(false))
}

// ---------------------------------------------------------------------------
// DateAdapter
// ---------------------------------------------------------------------------

pub struct DateAdapter {
    descriptor: VariableDescriptor,
    input_class: String,
    selection: Option<CalendarSelection>,
    /// Raw text while the typed value is rejected
    rejected_text: Option<String>,
    phase: FieldPhase,
}

impl DateAdapter {
    pub fn mount(
        descriptor: &VariableDescriptor,
        saved_value: Option<&str>,
        context: &AdapterContext,
    ) -> Self {
        let enable_time = descriptor.kind.enables_time();
        let selection = saved_value
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .and_then(|millis| CalendarSelection::from_epoch_millis(millis, enable_time));

        Self {
            descriptor: descriptor.clone(),
            input_class: context.text_like_input_class.clone(),
            selection,
            rejected_text: None,
            phase: FieldPhase::Pristine,
        }
    }

    pub fn boxed(
        descriptor: &VariableDescriptor,
        saved_value: Option<&str>,
        context: &AdapterContext,
    ) -> Box<dyn InputAdapter> {
        Box::new(Self::mount(descriptor, saved_value, context))
    }

    fn enable_time(&self) -> bool {
        self.descriptor.kind.enables_time()
    }

    pub fn selection(&self) -> Option<CalendarSelection> {
        self.selection
    }

    fn clear(&mut self) -> Option<FieldChange> {
        self.selection = None;
        self.rejected_text = None;
        self.phase = FieldPhase::Valid;
        Some(FieldChange::clear(&self.descriptor.name))
    }

    fn display(&self) -> String {
        let Some(selection) = self.selection else {
            return String::new();
        };
        match selection.time {
            Some(time) if self.enable_time() => selection
                .date
                .and_time(time)
                .format("%B %-d, %Y %-I:%M %p")
                .to_string(),
            _ => selection.date.format("%B %-d, %Y").to_string(),
        }
    }
}

impl InputAdapter for DateAdapter {
    fn descriptor(&self) -> &VariableDescriptor {
        &self.descriptor
    }

    fn render(&self) -> FieldView {
        let input_type = if self.enable_time() {
            "datetime-local"
        } else {
            "date"
        };
        let clean = self.descriptor.clean_name();
        let error = if self.phase == FieldPhase::Invalid {
            "is-error"
        } else {
            ""
        };

        let mut view = FieldView::new(&self.descriptor, input_type);
        view.value = match &self.rejected_text {
            Some(text) => text.clone(),
            None => self.display(),
        };
        view.input_class = join_classes([self.input_class.as_str(), clean.as_str(), error]);
        view.is_error = self.phase == FieldPhase::Invalid;
        view.phase = self.phase;
        view
    }

    fn on_user_input(
        &mut self,
        input: UserInput,
        validator: &dyn Validator,
    ) -> Option<FieldChange> {
        self.phase = FieldPhase::Editing;
        if input.is_empty() {
            return self.clear();
        }

        let enable_time = self.enable_time();
        let (millis, text) = match input {
            UserInput::Dates(dates) => (Some(dates[0].to_epoch_millis(enable_time)), None),
            UserInput::Text(text) => {
                let millis = parse_typed(&text)
                    .and_then(|ms| CalendarSelection::from_epoch_millis(ms, enable_time))
                    .map(|selection| selection.to_epoch_millis(enable_time));
                (millis, Some(text))
            }
        };

        let accepted = millis.and_then(|ms| {
            let canonical = ms.to_string();
            validator
                .validity(&self.descriptor.name, &canonical)
                .ok()
                .map(|_| (ms, canonical))
        });

        match accepted {
            Some((ms, canonical)) => {
                self.selection = CalendarSelection::from_epoch_millis(ms, enable_time);
                self.rejected_text = None;
                self.phase = FieldPhase::Valid;
                Some(FieldChange::set(&self.descriptor.name, canonical))
            }
            None => {
                self.rejected_text = text;
                self.phase = FieldPhase::Invalid;
                None
            }
        }
    }

    fn phase(&self) -> FieldPhase {
        self.phase
    }

    fn focus(&mut self) {
        if self.phase == FieldPhase::Pristine {
            self.phase = FieldPhase::Editing;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use form_types::VariableKind;
    use proptest::prelude::*;

    fn start() -> VariableDescriptor {
        VariableDescriptor::new("Start Date", VariableKind::Date)
    }

    fn meeting() -> VariableDescriptor {
        VariableDescriptor::new("Meeting", VariableKind::DateTime)
    }

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_picker_selection_becomes_millis_string() {
        let validator = StaticValidator::new(vec![start()]);
        let mut adapter = DateAdapter::mount(&start(), None, &context());

        let change = adapter.on_user_input(
            UserInput::Dates(vec![CalendarSelection::date(ymd(1971, 1, 1))]),
            &validator,
        );

        assert_eq!(change, Some(FieldChange::set("Start Date", "31536000000")));
        assert_eq!(adapter.render().value, "January 1, 1971");
    }

    #[test]
    fn test_time_dropped_for_plain_dates() {
        let validator = StaticValidator::new(vec![start()]);
        let mut adapter = DateAdapter::mount(&start(), None, &context());
        let noon = NaiveTime::from_hms_opt(12, 0, 0).unwrap();

        let change = adapter.on_user_input(
            UserInput::Dates(vec![CalendarSelection::at(ymd(1971, 1, 1), noon)]),
            &validator,
        );

        assert_eq!(change.unwrap().value.as_deref(), Some("31536000000"));
        assert_eq!(adapter.selection().unwrap().time, None);
    }

    #[test]
    fn test_time_kept_for_date_time() {
        let validator = StaticValidator::new(vec![meeting()]);
        let mut adapter = DateAdapter::mount(&meeting(), None, &context());
        let half_nine = NaiveTime::from_hms_opt(9, 30, 0).unwrap();

        let change = adapter.on_user_input(
            UserInput::Dates(vec![CalendarSelection::at(ymd(1970, 1, 2), half_nine)]),
            &validator,
        );

        let expected = (86_400 + 9 * 3600 + 30 * 60) * 1000_i64;
        assert_eq!(change.unwrap().value, Some(expected.to_string()));
        assert_eq!(adapter.render().value, "January 2, 1970 9:30 AM");
        assert_eq!(adapter.render().input_type, "datetime-local");
    }

    #[test]
    fn test_saved_value_restored() {
        let adapter = DateAdapter::mount(&start(), Some("31536000000"), &context());
        assert_eq!(adapter.selection(), Some(CalendarSelection::date(ymd(1971, 1, 1))));
        assert_eq!(adapter.phase(), FieldPhase::Pristine);
    }

    #[test]
    fn test_unparseable_saved_value_mounts_empty() {
        let adapter = DateAdapter::mount(&start(), Some("yesterday"), &context());
        assert!(adapter.selection().is_none());
        assert_eq!(adapter.render().value, "");
    }

    #[test]
    fn test_iso_text_accepted() {
        let validator = StaticValidator::new(vec![start()]);
        let mut adapter = DateAdapter::mount(&start(), None, &context());

        let change = adapter.on_user_input(UserInput::text("1971-01-01"), &validator);

        assert_eq!(change, Some(FieldChange::set("Start Date", "31536000000")));
    }

    #[test]
    fn test_compact_date_accepted() {
        let validator = StaticValidator::new(vec![start()]);
        let mut adapter = DateAdapter::mount(&start(), None, &context());

        let change = adapter.on_user_input(UserInput::text("20240301"), &validator);

        assert_eq!(change, Some(FieldChange::set("Start Date", "1709251200000")));
        assert_eq!(adapter.render().value, "March 1, 2024");
    }

    #[test]
    fn test_bare_numbers_are_not_timestamps() {
        let validator = StaticValidator::new(vec![start()]);

        for typed in ["2024", "0", "1709251200000", "20241399"] {
            let mut adapter = DateAdapter::mount(&start(), None, &context());
            let change = adapter.on_user_input(UserInput::text(typed), &validator);

            assert!(change.is_none(), "{typed} should be rejected");
            assert_eq!(adapter.phase(), FieldPhase::Invalid);
            assert!(adapter.selection().is_none());
        }
    }

    #[test]
    fn test_bad_text_marks_invalid() {
        let validator = StaticValidator::new(vec![start()]);
        let mut adapter = DateAdapter::mount(&start(), Some("31536000000"), &context());

        let change = adapter.on_user_input(UserInput::text("next tuesday"), &validator);

        assert!(change.is_none());
        assert_eq!(adapter.phase(), FieldPhase::Invalid);
        let view = adapter.render();
        assert!(view.is_error);
        assert_eq!(view.value, "next tuesday");
        // previous selection is untouched
        assert!(adapter.selection().is_some());
    }

    #[test]
    fn test_empty_selection_clears() {
        let validator = StaticValidator::new(vec![start()]);
        let mut adapter = DateAdapter::mount(&start(), Some("31536000000"), &context());

        let change = adapter.on_user_input(UserInput::Dates(vec![]), &validator);

        assert_eq!(change, Some(FieldChange::clear("Start Date")));
        assert_eq!(adapter.phase(), FieldPhase::Valid);
        assert!(adapter.selection().is_none());
    }

    proptest! {
        #[test]
        fn prop_date_time_round_trip(
            days in -36_500i64..73_000,
            millis_of_day in 0i64..86_400_000,
        ) {
            let millis = days * 86_400_000 + millis_of_day;
            let selection = CalendarSelection::from_epoch_millis(millis, true).unwrap();
            prop_assert_eq!(selection.to_epoch_millis(true), millis);
            prop_assert_eq!(
                CalendarSelection::from_epoch_millis(selection.to_epoch_millis(true), true),
                Some(selection)
            );
        }

        #[test]
        fn prop_date_round_trip_pins_midnight(
            days in -36_500i64..73_000,
            millis_of_day in 0i64..86_400_000,
        ) {
            let millis = days * 86_400_000 + millis_of_day;
            let selection = CalendarSelection::from_epoch_millis(millis, false).unwrap();
            prop_assert_eq!(selection.time, None);
            prop_assert_eq!(selection.to_epoch_millis(false), days * 86_400_000);
        }
    }
}
