// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Recurrence fields for offers and the arithmetic for locating payment periods.
//!
//! An offer with a [`Recurrence`] describes a subscription: a series of invoices, one per
//! period. Seconds- and days-based periods are fixed-length; months and years step through the
//! Gregorian calendar anchored at the base time, so "the 31st of each month" clamps to shorter
//! months rather than drifting.

use std::io::{self, Read};

use chrono::{Months, TimeZone, Utc};

use crate::ln::msgs::DecodeError;
use crate::util::ser::{Readable, Writeable, Writer};

/// How a recurring offer's period length is denominated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeUnit {
	/// Fixed-length periods of whole seconds.
	Seconds,
	/// Fixed-length periods of whole days (86,400 seconds).
	Days,
	/// Calendar months, stepped from the base time.
	Months,
	/// Calendar years, stepped from the base time.
	Years,
}

impl TimeUnit {
	fn from_u8(unit: u8) -> Option<Self> {
		match unit {
			0 => Some(TimeUnit::Seconds),
			1 => Some(TimeUnit::Days),
			2 => Some(TimeUnit::Months),
			3 => Some(TimeUnit::Years),
			_ => None,
		}
	}

	fn to_u8(self) -> u8 {
		match self {
			TimeUnit::Seconds => 0,
			TimeUnit::Days => 1,
			TimeUnit::Months => 2,
			TimeUnit::Years => 3,
		}
	}
}

/// The period description of a recurring offer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Recurrence {
	/// The unit the period is measured in.
	pub time_unit: TimeUnit,
	/// How many units make up one period. A value of zero renders the offer unusable.
	pub period: u32,
}

/// Anchors a recurring offer's periods at an absolute time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecurrenceBase {
	/// If non-zero, a payer may start with any period (supplying `recurrence_start`) rather than
	/// the first.
	pub start_any_period: u8,
	/// Seconds since the Unix epoch at which period 0 starts.
	pub basetime: u64,
}

/// Restricts when invoices for a period may be requested and paid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecurrencePaywindow {
	/// Seconds before the period start from which payment is accepted.
	pub seconds_before: u32,
	/// If non-zero, amounts are expected to be proportional to the time remaining in the period.
	pub proportional_amount: u8,
	/// Seconds after the period start until which payment is accepted.
	pub seconds_after: u32,
}

impl Recurrence {
	/// Computes the start, in seconds since the Unix epoch, of period `period_idx` anchored at
	/// `basetime`. Period 0 starts at `basetime` itself.
	///
	/// Returns `None` if the result is not representable, e.g. the period count overflows or the
	/// calendar stepping leaves the supported date range.
	pub fn period_start(&self, basetime: u64, period_idx: u64) -> Option<u64> {
		let units = (self.period as u64).checked_mul(period_idx)?;
		match self.time_unit {
			TimeUnit::Seconds => basetime.checked_add(units),
			TimeUnit::Days => basetime.checked_add(units.checked_mul(86400)?),
			TimeUnit::Months => add_months(basetime, units),
			TimeUnit::Years => add_months(basetime, units.checked_mul(12)?),
		}
	}

	/// Computes the window `[start, end]` within which the invoice for period `period_idx` is
	/// payable. Without an explicit paywindow the window opens one minute before the period and
	/// closes when the period does.
	pub fn paywindow(
		&self, paywindow: Option<&RecurrencePaywindow>, basetime: u64, period_idx: u64,
	) -> Option<(u64, u64)> {
		let period_start = self.period_start(basetime, period_idx)?;
		match paywindow {
			Some(window) => {
				let start = period_start.saturating_sub(window.seconds_before as u64);
				let end = period_start.checked_add(window.seconds_after as u64)?;
				Some((start, end))
			},
			None => {
				let end = self.period_start(basetime, period_idx.checked_add(1)?)?.checked_sub(1)?;
				Some((period_start.saturating_sub(60), end))
			},
		}
	}
}

/// Steps `basetime` forward by `months` calendar months, clamping the day-of-month to the target
/// month's length.
fn add_months(basetime: u64, months: u64) -> Option<u64> {
	let months = u32::try_from(months).ok()?;
	let basetime = i64::try_from(basetime).ok()?;
	let base = Utc.timestamp_opt(basetime, 0).single()?;
	let shifted = base.checked_add_months(Months::new(months))?;
	u64::try_from(shifted.timestamp()).ok()
}

impl Writeable for Recurrence {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), io::Error> {
		self.time_unit.to_u8().write(writer)?;
		self.period.write(writer)
	}
}

impl Readable for Recurrence {
	fn read<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
		let time_unit =
			TimeUnit::from_u8(Readable::read(reader)?).ok_or(DecodeError::InvalidValue)?;
		let period = Readable::read(reader)?;
		Ok(Recurrence { time_unit, period })
	}
}

impl Writeable for RecurrenceBase {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), io::Error> {
		self.start_any_period.write(writer)?;
		self.basetime.write(writer)
	}
}

impl Readable for RecurrenceBase {
	fn read<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
		let start_any_period = Readable::read(reader)?;
		let basetime = Readable::read(reader)?;
		Ok(RecurrenceBase { start_any_period, basetime })
	}
}

impl Writeable for RecurrencePaywindow {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), io::Error> {
		self.seconds_before.write(writer)?;
		self.proportional_amount.write(writer)?;
		self.seconds_after.write(writer)
	}
}

impl Readable for RecurrencePaywindow {
	fn read<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
		let seconds_before = Readable::read(reader)?;
		let proportional_amount = Readable::read(reader)?;
		let seconds_after = Readable::read(reader)?;
		Ok(RecurrencePaywindow { seconds_before, proportional_amount, seconds_after })
	}
}

#[cfg(test)]
mod tests {
	use super::{Recurrence, RecurrencePaywindow, TimeUnit};
	use crate::util::ser::{Readable, Writeable};

	#[test]
	fn computes_fixed_length_periods() {
		let recurrence = Recurrence { time_unit: TimeUnit::Seconds, period: 600 };
		assert_eq!(recurrence.period_start(1_600_000_000, 0), Some(1_600_000_000));
		assert_eq!(recurrence.period_start(1_600_000_000, 3), Some(1_600_001_800));

		let recurrence = Recurrence { time_unit: TimeUnit::Days, period: 30 };
		assert_eq!(
			recurrence.period_start(1_600_000_000, 2),
			Some(1_600_000_000 + 60 * 86400)
		);
	}

	#[test]
	fn steps_months_through_the_calendar() {
		let recurrence = Recurrence { time_unit: TimeUnit::Months, period: 1 };
		// 2021-01-31T00:00:00Z
		let base = 1_612_051_200;
		// One month later is 2021-02-28, not March 3rd.
		assert_eq!(recurrence.period_start(base, 1), Some(1_614_470_400));
		// Two months later the day-of-month springs back to the 31st.
		assert_eq!(recurrence.period_start(base, 2), Some(1_617_148_800));
	}

	#[test]
	fn steps_years_through_the_calendar() {
		let recurrence = Recurrence { time_unit: TimeUnit::Years, period: 1 };
		// 2020-02-29T12:00:00Z, a leap day.
		let base = 1_582_977_600;
		// 2021-02-28T12:00:00Z
		assert_eq!(recurrence.period_start(base, 1), Some(1_614_513_600));
		// 2024-02-29T12:00:00Z, four years later the leap day exists again.
		assert_eq!(recurrence.period_start(base, 4), Some(1_709_208_000));
	}

	#[test]
	fn period_start_checks_overflow() {
		let recurrence = Recurrence { time_unit: TimeUnit::Seconds, period: u32::MAX };
		assert_eq!(recurrence.period_start(u64::MAX - 5, 2), None);

		let recurrence = Recurrence { time_unit: TimeUnit::Months, period: u32::MAX };
		assert_eq!(recurrence.period_start(0, u64::MAX), None);
	}

	#[test]
	fn paywindow_defaults_to_one_minute_before() {
		let recurrence = Recurrence { time_unit: TimeUnit::Days, period: 30 };
		let basetime = 1_600_000_000;
		assert_eq!(
			recurrence.paywindow(None, basetime, 1),
			Some((basetime + 30 * 86400 - 60, basetime + 60 * 86400 - 1))
		);

		let window =
			RecurrencePaywindow { seconds_before: 86400, proportional_amount: 0, seconds_after: 3600 };
		assert_eq!(
			recurrence.paywindow(Some(&window), basetime, 1),
			Some((basetime + 29 * 86400, basetime + 30 * 86400 + 3600))
		);
	}

	#[test]
	fn round_trips_serialization() {
		let recurrence = Recurrence { time_unit: TimeUnit::Months, period: 3 };
		let encoded = recurrence.encode();
		assert_eq!(encoded, vec![2, 0, 0, 0, 3]);
		assert_eq!(<Recurrence as Readable>::read(&mut &encoded[..]).unwrap(), recurrence);

		let window =
			RecurrencePaywindow { seconds_before: 60, proportional_amount: 1, seconds_after: 120 };
		let encoded = window.encode();
		assert_eq!(
			<RecurrencePaywindow as Readable>::read(&mut &encoded[..]).unwrap(),
			window
		);
	}
}
