use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::notify::{Notice, NoticeKind};
use crate::observability;

use super::availability;
use super::clock::now_ms;
use super::{Engine, EngineError, LockedSlots};

fn validate_details(details: &BookingDetails) -> Result<(), EngineError> {
    if details.party_name.trim().is_empty() {
        return Err(EngineError::InvalidReservation("party name must not be empty".into()));
    }
    if details.party_name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("party name too long"));
    }
    if details.period.trim().is_empty() {
        return Err(EngineError::InvalidReservation("period must not be empty".into()));
    }
    if details.period.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("period name too long"));
    }
    if let Some(notes) = &details.notes
        && notes.len() > MAX_NOTES_LEN
    {
        return Err(EngineError::LimitExceeded("notes too long"));
    }
    Ok(())
}

fn validate_candidate(candidate: &Candidate) -> Result<(), EngineError> {
    validate_details(&candidate.details)?;
    if let Some(client) = &candidate.client_id {
        if client.trim().is_empty() {
            return Err(EngineError::InvalidReservation("client id must not be empty".into()));
        }
        if client.len() > MAX_CLIENT_ID_LEN {
            return Err(EngineError::LimitExceeded("client id too long"));
        }
    }
    if let Some(key) = &candidate.idempotency_key
        && (key.is_empty() || key.len() > MAX_IDEMPOTENCY_KEY_LEN)
    {
        return Err(EngineError::LimitExceeded("idempotency key length"));
    }
    if !candidate.initial_status().is_active() {
        return Err(EngineError::InvalidReservation(
            "a reservation cannot be created canceled".into(),
        ));
    }
    Ok(())
}

fn record_rejection(reason: RejectReason) {
    metrics::counter!(observability::REJECTIONS_TOTAL, "reason" => reason.code()).increment(1);
}

impl Engine {
    // ── Configuration ────────────────────────────────────

    /// Replace the booking rules. Capacity keys must name a defined period.
    pub async fn set_rules(&self, rules: BookingRules) -> Result<(), EngineError> {
        self.persist_calendar_event(|calendar| {
            calendar.validate_rules(&rules)?;
            Ok((Event::RulesSet { rules }, ()))
        })
        .await?;
        tracing::info!("tenant {}: booking rules updated", self.tenant);
        Ok(())
    }

    /// Replace party bounds, cutoff and closed days; per-period capacities
    /// already configured are carried over and `rules.period_capacity` is ignored.
    pub async fn set_rules_keeping_capacity(
        &self,
        mut rules: BookingRules,
    ) -> Result<BookingRules, EngineError> {
        self.persist_calendar_event(|calendar| {
            rules.period_capacity = calendar
                .rules
                .as_ref()
                .map(|current| current.period_capacity.clone())
                .unwrap_or_default();
            calendar.validate_rules(&rules)?;
            Ok((Event::RulesSet { rules: rules.clone() }, rules))
        })
        .await
    }

    /// Set (or with `None` remove) the guest limit of every period named `period`.
    pub async fn set_period_capacity(
        &self,
        period: &str,
        capacity: Option<u32>,
    ) -> Result<BookingRules, EngineError> {
        self.persist_calendar_event(|calendar| {
            let mut rules = calendar.rules()?.clone();
            match capacity {
                Some(cap) => {
                    rules.period_capacity.insert(period.to_string(), cap);
                }
                None => {
                    rules.period_capacity.remove(period);
                }
            }
            calendar.validate_rules(&rules)?;
            Ok((Event::RulesSet { rules: rules.clone() }, rules))
        })
        .await
    }

    /// Create or replace a period definition, keyed by `period.id`.
    pub async fn upsert_period(&self, period: Period) -> Result<(), EngineError> {
        let name = period.name.clone();
        self.persist_calendar_event(|calendar| {
            calendar.validate_period(&period)?;
            Ok((Event::PeriodUpserted { period }, ()))
        })
        .await?;
        tracing::debug!("tenant {}: period {name} saved", self.tenant);
        Ok(())
    }

    /// Remove a period definition. Existing reservations are left alone; the
    /// name stops being bookable on dates nothing else defines it for.
    pub async fn remove_period(&self, id: Ulid) -> Result<Period, EngineError> {
        self.persist_calendar_event(|calendar| {
            let period = calendar
                .periods
                .iter()
                .find(|p| p.id == id)
                .cloned()
                .ok_or(EngineError::NotFound(id))?;
            let still_named = calendar
                .periods
                .iter()
                .any(|p| p.id != id && p.name == period.name);
            let has_capacity = calendar
                .rules
                .as_ref()
                .is_some_and(|r| r.period_capacity.contains_key(&period.name));
            if has_capacity && !still_named {
                return Err(EngineError::InvalidPeriod(format!(
                    "capacity is still configured for {}",
                    period.name
                )));
            }
            Ok((Event::PeriodRemoved { id }, period))
        })
        .await
    }

    // ── Reservations ─────────────────────────────────────

    /// Accept a new reservation, or report why it cannot be accepted.
    ///
    /// A repeated idempotency key returns the reservation created the first
    /// time without checking anything again.
    pub async fn create(&self, candidate: Candidate) -> Result<Outcome<Reservation>, EngineError> {
        validate_candidate(&candidate)?;
        let slot = candidate.details.slot();

        if let Some(key) = &candidate.idempotency_key
            && let Some(existing) = self.idempotent_replay(key, &slot)?
        {
            return Ok(Outcome::Done(existing));
        }
        if let Some(client) = &candidate.client_id
            && self.active_by_client.contains_key(client)
        {
            return Ok(self.reject(RejectReason::DuplicateActiveReservation));
        }
        if self.reservations.len() >= MAX_RESERVATIONS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many reservations"));
        }

        let mut locked = self.lock_slots(std::slice::from_ref(&slot)).await?;
        if let Some(key) = &candidate.idempotency_key
            && let Some(existing) = self.idempotent_replay(key, &slot)?
        {
            return Ok(Outcome::Done(existing));
        }
        if let Decision::Reject(reason) =
            self.decide(&locked, &slot, candidate.details.party_size()).await
        {
            return Ok(self.reject(reason));
        }

        let id = Ulid::new();
        if let Some(client) = &candidate.client_id
            && !self.claim_client(client, id)
        {
            return Ok(self.reject(RejectReason::DuplicateActiveReservation));
        }
        if let Some(key) = &candidate.idempotency_key
            && !self.claim_idempotency_key(key, id)
        {
            self.release_client_claim(candidate.client_id.as_deref(), id);
            return Err(EngineError::Contention(slot));
        }

        let at = now_ms();
        let reservation = Reservation {
            id,
            status: candidate.initial_status(),
            client_id: candidate.client_id,
            source: candidate.source,
            table: None,
            idempotency_key: candidate.idempotency_key,
            details: candidate.details,
            created_at: at,
            updated_at: at,
        };
        let event = Event::ReservationCreated {
            reservation: reservation.clone(),
        };
        if let Err(e) = self.persist_and_apply(&event, &mut locked).await {
            self.release_client_claim(reservation.client_id.as_deref(), id);
            if let Some(key) = &reservation.idempotency_key {
                self.idempotency.remove_if(key, |_, owner| *owner == id);
            }
            return Err(e);
        }
        drop(locked);

        metrics::counter!(observability::RESERVATIONS_CREATED_TOTAL, "source" => reservation.source.as_str())
            .increment(1);
        tracing::debug!(
            "tenant {}: reservation {id} created for {} ({} guests)",
            self.tenant,
            reservation.slot(),
            reservation.party_size()
        );
        self.publish(&reservation, NoticeKind::Created);
        Ok(Outcome::Done(reservation))
    }

    /// Move a reservation to `to`. Leaving Canceled re-runs the full
    /// availability check and the one-active-per-client rule.
    pub async fn change_status(
        &self,
        id: Ulid,
        to: Status,
    ) -> Result<Outcome<Reservation>, EngineError> {
        let (current, mut locked) = self.lock_reservation(id, None).await?;
        if !current.status.can_transition_to(to) {
            return Err(EngineError::InvalidTransition {
                id,
                from: current.status,
                to,
            });
        }

        let reactivating = !current.status.is_active() && to.is_active();
        if reactivating {
            if let Some(client) = &current.client_id
                && self.active_by_client.get(client).is_some_and(|owner| *owner != id)
            {
                return Ok(self.reject(RejectReason::DuplicateActiveReservation));
            }
            let slot = current.slot();
            if let Decision::Reject(reason) =
                self.decide(&locked, &slot, current.party_size()).await
            {
                return Ok(self.reject(reason));
            }
            if let Some(client) = &current.client_id
                && !self.claim_client(client, id)
            {
                return Ok(self.reject(RejectReason::DuplicateActiveReservation));
            }
        }

        let event = Event::StatusChanged {
            id,
            status: to,
            at: now_ms(),
        };
        if let Err(e) = self.persist_and_apply(&event, &mut locked).await {
            if reactivating {
                self.release_client_claim(current.client_id.as_deref(), id);
            }
            return Err(e);
        }
        drop(locked);

        let updated = self.get(id).ok_or(EngineError::NotFound(id))?;
        metrics::counter!(observability::STATUS_CHANGES_TOTAL, "status" => to.as_str()).increment(1);
        tracing::debug!("tenant {}: reservation {id} {} -> {to}", self.tenant, current.status);
        self.publish(&updated, NoticeKind::StatusChanged);
        Ok(Outcome::Done(updated))
    }

    pub async fn cancel(&self, id: Ulid) -> Result<Outcome<Reservation>, EngineError> {
        self.change_status(id, Status::Canceled).await
    }

    /// Swap the booking details of a live reservation in one step.
    ///
    /// The candidate is checked as if the reservation's own guests were
    /// already released. On rejection nothing changes and the reservation
    /// keeps its original slot.
    pub async fn replace(
        &self,
        id: Ulid,
        details: BookingDetails,
    ) -> Result<Outcome<Reservation>, EngineError> {
        validate_details(&details)?;
        self.replace_with(id, |_| details.clone()).await
    }

    /// Like `replace`, but only the fields set in `edit` change. The merge
    /// reads the reservation under its slot lock, so concurrent edits of
    /// other fields are kept.
    pub async fn edit(
        &self,
        id: Ulid,
        edit: DetailsEdit,
    ) -> Result<Outcome<Reservation>, EngineError> {
        self.replace_with(id, |current| edit.apply(current)).await
    }

    async fn replace_with(
        &self,
        id: Ulid,
        build: impl Fn(&BookingDetails) -> BookingDetails,
    ) -> Result<Outcome<Reservation>, EngineError> {
        let mut seen = self.get(id).ok_or(EngineError::NotFound(id))?;
        for _ in 0..MAX_LOCK_RETRIES {
            let target = build(&seen.details).slot();
            let (current, locked) = self.lock_reservation(id, Some(&target)).await?;
            let details = build(&current.details);
            if details.slot() != target {
                // Moved while we waited and the merged slot went with it
                drop(locked);
                seen = current;
                continue;
            }
            validate_details(&details)?;
            return self.commit_replace(current, locked, details).await;
        }
        Err(EngineError::Contention(seen.slot()))
    }

    async fn commit_replace(
        &self,
        current: Reservation,
        mut locked: LockedSlots,
        details: BookingDetails,
    ) -> Result<Outcome<Reservation>, EngineError> {
        let id = current.id;
        let target = details.slot();
        if !current.status.is_active() {
            return Err(EngineError::ReservationCanceled(id));
        }

        let mut booked = locked.booked(&target);
        if current.slot() == target {
            booked = booked.saturating_sub(current.party_size());
        }
        if let Decision::Reject(reason) = self
            .decide_with_booked(booked, &target, details.party_size())
            .await
        {
            return Ok(self.reject(reason));
        }

        let event = Event::ReservationReplaced {
            id,
            details,
            at: now_ms(),
        };
        self.persist_and_apply(&event, &mut locked).await?;
        drop(locked);

        let updated = self.get(id).ok_or(EngineError::NotFound(id))?;
        metrics::counter!(observability::REPLACEMENTS_TOTAL).increment(1);
        tracing::debug!(
            "tenant {}: reservation {id} moved {} -> {}",
            self.tenant,
            current.slot(),
            target
        );
        self.notify.publish(
            Notice::new(&self.tenant, &updated, NoticeKind::Replaced).moved_from(current.details.date),
        );
        Ok(Outcome::Done(updated))
    }

    /// Set or clear the table label. Capacity is not affected.
    pub async fn assign_table(
        &self,
        id: Ulid,
        table: Option<String>,
    ) -> Result<Reservation, EngineError> {
        if let Some(label) = &table
            && label.len() > MAX_LABEL_LEN
        {
            return Err(EngineError::LimitExceeded("table label too long"));
        }
        let table = table.filter(|label| !label.trim().is_empty());
        let (current, mut locked) = self.lock_reservation(id, None).await?;
        if !current.status.is_active() {
            return Err(EngineError::ReservationCanceled(id));
        }
        let event = Event::TableAssigned {
            id,
            table,
            at: now_ms(),
        };
        self.persist_and_apply(&event, &mut locked).await?;
        drop(locked);
        self.get(id).ok_or(EngineError::NotFound(id))
    }

    // ── Helpers ──────────────────────────────────────────

    /// Lock the slot a reservation currently sits in (plus `extra`), then
    /// confirm it did not move while we waited.
    async fn lock_reservation(
        &self,
        id: Ulid,
        extra: Option<&SlotKey>,
    ) -> Result<(Reservation, LockedSlots), EngineError> {
        let mut seen = self.get(id).ok_or(EngineError::NotFound(id))?;
        for _ in 0..MAX_LOCK_RETRIES {
            let slot = seen.slot();
            let mut keys = vec![slot.clone()];
            keys.extend(extra.cloned());
            let locked = self.lock_slots(&keys).await?;
            let current = self.get(id).ok_or(EngineError::NotFound(id))?;
            if current.slot() == slot {
                return Ok((current, locked));
            }
            drop(locked);
            seen = current;
        }
        Err(EngineError::Contention(seen.slot()))
    }

    /// Run the availability check against a locked slot.
    async fn decide(&self, locked: &LockedSlots, slot: &SlotKey, party_size: u32) -> Decision {
        self.decide_with_booked(locked.booked(slot), slot, party_size)
            .await
    }

    async fn decide_with_booked(&self, booked: u32, slot: &SlotKey, party_size: u32) -> Decision {
        let now = self.clock.now();
        let calendar = self.calendar.read().await;
        availability::check(&calendar, booked, slot.date, &slot.period, party_size, now)
    }

    fn reject<T>(&self, reason: RejectReason) -> Outcome<T> {
        record_rejection(reason);
        tracing::debug!("tenant {}: rejected: {}", self.tenant, reason.code());
        Outcome::Rejected(reason)
    }

    /// Claim the client's single active slot for `id`. Fails if another
    /// reservation holds it.
    fn claim_client(&self, client: &str, id: Ulid) -> bool {
        let entry = self.active_by_client.entry(client.to_string()).or_insert(id);
        *entry == id
    }

    fn release_client_claim(&self, client: Option<&str>, id: Ulid) {
        if let Some(client) = client {
            self.active_by_client.remove_if(client, |_, owner| *owner == id);
        }
    }

    fn claim_idempotency_key(&self, key: &str, id: Ulid) -> bool {
        let entry = self.idempotency.entry(key.to_string()).or_insert(id);
        *entry == id
    }

    /// The reservation an idempotency key already produced, if any. A key
    /// claimed by a create that has not committed yet reads as contention.
    fn idempotent_replay(
        &self,
        key: &str,
        slot: &SlotKey,
    ) -> Result<Option<Reservation>, EngineError> {
        let Some(owner) = self.idempotency.get(key).map(|e| *e.value()) else {
            return Ok(None);
        };
        match self.get(owner) {
            Some(existing) => Ok(Some(existing)),
            None => Err(EngineError::Contention(slot.clone())),
        }
    }
}
