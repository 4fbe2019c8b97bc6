// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Per-router ledger of which `(input port, VC)` owns which output ports.
//!
//! A reservation is made when a HEAD flit has been routed and held until its
//! TAIL has been forwarded. A multicast HEAD claims all of its outputs in one
//! step or none of them.
//!
//! Each output may be held by several reservations at once as long as they
//! use different VCs. A given output VC is never held by two different keys.

use std::collections::HashMap;
use std::fmt;

use arbor_engine::sim_error;
use arbor_engine::types::{SimError, SimResult};
use itertools::Itertools;

/// Key of a reservation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Reservation {
    pub input_port: usize,
    pub vc: usize,
}

impl Reservation {
    #[must_use]
    pub fn new(input_port: usize, vc: usize) -> Self {
        Self { input_port, vc }
    }
}

impl fmt::Display for Reservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port {} vc {}", self.input_port, self.vc)
    }
}

/// Result of probing the table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReservationStatus {
    /// Nothing conflicts with the request.
    Available,
    /// This key already holds exactly these outputs.
    AlreadySame,
    /// This key already holds a different set of outputs.
    AlreadyOtherOut,
    /// One of the requested output VCs is held by a different key.
    OutVcBusy,
}

pub struct ReservationTable {
    /// Holders of each output, oldest first.
    holders: Vec<Vec<Reservation>>,

    /// Sorted output set claimed by each key.
    targets: HashMap<Reservation, Vec<usize>>,

    /// Round-robin pointer among the holders of each output.
    index: Vec<usize>,
}

impl ReservationTable {
    #[must_use]
    pub fn new(num_outputs: usize) -> Self {
        Self {
            holders: vec![Vec::new(); num_outputs],
            targets: HashMap::new(),
            index: vec![0; num_outputs],
        }
    }

    #[must_use]
    pub fn num_outputs(&self) -> usize {
        self.holders.len()
    }

    fn normalise(&self, outputs: &[usize]) -> Result<Vec<usize>, SimError> {
        if outputs.is_empty() {
            return sim_error!("reservation requested with no outputs");
        }
        if let Some(bad) = outputs.iter().find(|&&o| o >= self.num_outputs()) {
            return sim_error!(format!(
                "output {bad} out of range (router has {} outputs)",
                self.num_outputs()
            ));
        }
        Ok(outputs.iter().copied().sorted_unstable().dedup().collect())
    }

    fn status(&self, reservation: Reservation, outputs: &[usize]) -> ReservationStatus {
        if let Some(held) = self.targets.get(&reservation) {
            return if held.as_slice() == outputs {
                ReservationStatus::AlreadySame
            } else {
                ReservationStatus::AlreadyOtherOut
            };
        }

        let busy = outputs.iter().any(|&o| {
            self.holders[o]
                .iter()
                .any(|h| h.vc == reservation.vc && *h != reservation)
        });
        if busy {
            ReservationStatus::OutVcBusy
        } else {
            ReservationStatus::Available
        }
    }

    /// Probe a single output.
    pub fn check(
        &self,
        reservation: Reservation,
        output: usize,
    ) -> Result<ReservationStatus, SimError> {
        self.check_multi(reservation, &[output])
    }

    /// Probe a set of outputs (order and duplicates do not matter).
    pub fn check_multi(
        &self,
        reservation: Reservation,
        outputs: &[usize],
    ) -> Result<ReservationStatus, SimError> {
        let outputs = self.normalise(outputs)?;
        Ok(self.status(reservation, &outputs))
    }

    pub fn reserve(&mut self, reservation: Reservation, output: usize) -> SimResult {
        self.reserve_multi(reservation, &[output])
    }

    /// Claim all `outputs` for `reservation`.
    ///
    /// Re-reserving exactly what is already held leaves the table unchanged.
    /// Any other conflict is an error and nothing is claimed.
    pub fn reserve_multi(&mut self, reservation: Reservation, outputs: &[usize]) -> SimResult {
        let outputs = self.normalise(outputs)?;
        match self.status(reservation, &outputs) {
            ReservationStatus::Available => {
                for &o in &outputs {
                    self.holders[o].push(reservation);
                }
                self.targets.insert(reservation, outputs);
                Ok(())
            }
            ReservationStatus::AlreadySame => Ok(()),
            status => sim_error!(format!(
                "cannot reserve outputs [{}] for {reservation}: {status:?}",
                outputs.iter().join(", ")
            )),
        }
    }

    pub fn release(&mut self, reservation: Reservation, output: usize) -> SimResult {
        let outputs = self.normalise(&[output])?;
        self.remove_holder(reservation, &outputs)?;
        if let Some(held) = self.targets.get_mut(&reservation) {
            held.retain(|&o| o != output);
            if held.is_empty() {
                self.targets.remove(&reservation);
            }
        }
        Ok(())
    }

    /// Release all `outputs` held by `reservation` and forget its target set.
    pub fn release_multi(&mut self, reservation: Reservation, outputs: &[usize]) -> SimResult {
        let outputs = self.normalise(outputs)?;
        self.remove_holder(reservation, &outputs)?;
        self.targets.remove(&reservation);
        Ok(())
    }

    fn remove_holder(&mut self, reservation: Reservation, outputs: &[usize]) -> SimResult {
        // Check everything first so that a failed release changes nothing
        if let Some(&o) = outputs
            .iter()
            .find(|&&o| !self.holders[o].contains(&reservation))
        {
            return sim_error!(format!("{reservation} does not hold output {o}"));
        }
        for &o in outputs {
            self.holders[o].retain(|h| *h != reservation);
            if self.index[o] >= self.holders[o].len() {
                self.index[o] = 0;
            }
        }
        Ok(())
    }

    /// The outputs claimed by `(input_port, vc)`, in ascending order.
    #[must_use]
    pub fn reservations(&self, input_port: usize, vc: usize) -> &[usize] {
        self.targets
            .get(&Reservation::new(input_port, vc))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Holders of `output`, oldest first.
    #[must_use]
    pub fn holders(&self, output: usize) -> &[Reservation] {
        &self.holders[output]
    }

    /// Move each output's round-robin pointer on to its next holder.
    pub fn update_index(&mut self) {
        for (index, holders) in self.index.iter_mut().zip(&self.holders) {
            *index = if holders.is_empty() {
                0
            } else {
                (*index + 1) % holders.len()
            };
        }
    }

    /// The holder currently at the round-robin pointer of `output`.
    #[must_use]
    pub fn priority_holder(&self, output: usize) -> Option<Reservation> {
        self.holders[output].get(self.index[output]).copied()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn reset(&mut self) {
        for holders in &mut self.holders {
            holders.clear();
        }
        self.targets.clear();
        self.index.fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_single() {
        let mut table = ReservationTable::new(4);
        let res = Reservation::new(0, 1);

        assert_eq!(table.check(res, 2).unwrap(), ReservationStatus::Available);
        table.reserve(res, 2).unwrap();
        assert_eq!(table.reservations(0, 1), &[2]);
        assert_eq!(table.check(res, 2).unwrap(), ReservationStatus::AlreadySame);
        assert_eq!(
            table.check(res, 3).unwrap(),
            ReservationStatus::AlreadyOtherOut
        );
    }

    #[test]
    fn multicast_is_atomic() {
        for num_outputs in 2..=4 {
            let mut table = ReservationTable::new(5);
            let outputs: Vec<usize> = (1..=num_outputs).collect();

            // Another input already holds the last output on the same VC
            let blocker = Reservation::new(4, 0);
            table.reserve(blocker, num_outputs).unwrap();

            let res = Reservation::new(0, 0);
            assert_eq!(
                table.check_multi(res, &outputs).unwrap(),
                ReservationStatus::OutVcBusy
            );
            assert!(table.reserve_multi(res, &outputs).is_err());
            for o in 1..num_outputs {
                assert!(table.holders(o).is_empty(), "partial claim on {o}");
            }
            assert!(table.reservations(0, 0).is_empty());

            table.release(blocker, num_outputs).unwrap();
            table.reserve_multi(res, &outputs).unwrap();
            for &o in &outputs {
                assert_eq!(table.holders(o), &[res]);
            }
            assert_eq!(table.reservations(0, 0), outputs.as_slice());
        }
    }

    #[test]
    fn mutual_exclusion_per_output_vc() {
        let mut table = ReservationTable::new(3);
        table.reserve(Reservation::new(0, 0), 2).unwrap();

        let other = Reservation::new(1, 0);
        assert_eq!(table.check(other, 2).unwrap(), ReservationStatus::OutVcBusy);
        assert!(table.reserve(other, 2).is_err());

        // A different VC of the same output is independent
        let other_vc = Reservation::new(1, 1);
        assert_eq!(
            table.check(other_vc, 2).unwrap(),
            ReservationStatus::Available
        );
        table.reserve(other_vc, 2).unwrap();
        assert_eq!(table.holders(2).len(), 2);
    }

    #[test]
    fn idempotent_recheck() {
        let mut table = ReservationTable::new(4);
        let res = Reservation::new(2, 1);
        assert_eq!(
            table.check_multi(res, &[3, 1]).unwrap(),
            ReservationStatus::Available
        );
        table.reserve_multi(res, &[3, 1]).unwrap();
        assert_eq!(
            table.check_multi(res, &[1, 3]).unwrap(),
            ReservationStatus::AlreadySame
        );

        table.reserve_multi(res, &[1, 3, 3]).unwrap();
        assert_eq!(table.holders(1), &[res]);
        assert_eq!(table.holders(3), &[res]);
        assert_eq!(table.reservations(2, 1), &[1, 3]);
    }

    #[test]
    fn release_clears_state() {
        let mut table = ReservationTable::new(4);
        let res = Reservation::new(0, 0);
        table.reserve_multi(res, &[2, 3]).unwrap();
        table.release_multi(res, &[2, 3]).unwrap();

        assert_eq!(
            table.check_multi(res, &[2, 3]).unwrap(),
            ReservationStatus::Available
        );
        assert!(table.is_empty());
    }

    #[test]
    fn release_unheld_is_an_error() {
        let mut table = ReservationTable::new(4);
        let res = Reservation::new(0, 0);
        assert!(table.release(res, 1).is_err());

        table.reserve(res, 1).unwrap();
        // Partly held: nothing is released
        assert!(table.release_multi(res, &[1, 2]).is_err());
        assert_eq!(table.holders(1), &[res]);
    }

    #[test]
    fn out_of_range_output() {
        let table = ReservationTable::new(2);
        assert!(table.check(Reservation::new(0, 0), 2).is_err());
        assert!(table.check_multi(Reservation::new(0, 0), &[]).is_err());
    }

    #[test]
    fn update_index_rotates() {
        let mut table = ReservationTable::new(2);
        let a = Reservation::new(0, 0);
        let b = Reservation::new(1, 1);
        table.reserve(a, 1).unwrap();
        table.reserve(b, 1).unwrap();

        assert_eq!(table.priority_holder(1), Some(a));
        table.update_index();
        assert_eq!(table.priority_holder(1), Some(b));
        table.update_index();
        assert_eq!(table.priority_holder(1), Some(a));
        assert_eq!(table.priority_holder(0), None);
    }

    #[test]
    fn reset_clears_everything() {
        let mut table = ReservationTable::new(3);
        table.reserve_multi(Reservation::new(0, 0), &[1, 2]).unwrap();
        table.update_index();
        table.reset();

        assert!(table.is_empty());
        assert!(table.holders(1).is_empty());
        assert_eq!(table.priority_holder(2), None);
    }
}
