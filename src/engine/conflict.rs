use crate::limits::*;
use crate::model::*;

use super::{EngineError, Schedule};

pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

pub fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.start >= span.end {
        return Err(EngineError::DegenerateRange {
            start: span.start,
            end: span.end,
        });
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(())
}

pub(crate) fn validate_window(window: &Span) -> Result<(), EngineError> {
    validate_span(window)?;
    if window.duration_ms() > MAX_WINDOW_MS {
        return Err(EngineError::LimitExceeded("window too wide"));
    }
    Ok(())
}

pub(crate) fn validate_customer(customer: Option<&str>) -> Result<(), EngineError> {
    if let Some(c) = customer
        && c.len() > MAX_CUSTOMER_REF_LEN {
            return Err(EngineError::LimitExceeded("customer reference too long"));
        }
    Ok(())
}

impl Schedule {
    /// Checks the vehicle index and, if a driver is carried, the driver
    /// overlay. Collisions on both axes are reported together; either one
    /// rejects. `exclude` is the reservation being rescheduled. Completed
    /// ranges block until they end at `now`.
    pub(super) fn ensure_free(
        &self,
        vehicle_id: ResourceId,
        driver_id: Option<ResourceId>,
        span: &Span,
        exclude: Option<ReservationId>,
        now: Ms,
    ) -> Result<(), EngineError> {
        let vehicle = self.vehicle_index(&vehicle_id)?;
        if exclude.is_none_or(|id| !vehicle.contains(&id))
            && vehicle.len() >= MAX_RESERVATIONS_PER_RESOURCE
        {
            return Err(EngineError::LimitExceeded("too many reservations on resource"));
        }
        let mut report = vehicle.collisions_at(span, exclude, now);

        if let Some(driver_id) = driver_id {
            let driver = self.driver_index(&driver_id)?;
            if exclude.is_none_or(|id| !driver.contains(&id))
                && driver.len() >= MAX_RESERVATIONS_PER_RESOURCE
            {
                return Err(EngineError::LimitExceeded("too many reservations on resource"));
            }
            report.extend(driver.collisions_at(span, exclude, now));
        }

        if report.is_empty() {
            Ok(())
        } else {
            Err(EngineError::Overlap(report))
        }
    }
}
