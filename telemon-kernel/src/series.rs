/**
 * SÉRIES TEMPORELLES - Timestamp -> Snapshot, ordonnées par insertion
 *
 * RÔLE : Unité de cache par host. Construite une fois à partir du range
 * ascendant du store, jamais modifiée ensuite (un refresh en reconstruit une).
 *
 * INVARIANTS :
 * - Un timestamp = une entrée (la dernière écriture gagne, position conservée)
 * - Itération dans l'ordre d'insertion = ordre ascendant du store
 * - front()/back() en O(1)
 */

use crate::snapshot::{decode_snapshot, Snapshot};
use crate::store::ScoredMember;
use std::collections::HashMap;
use tracing::warn;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeSeries {
    entries: Vec<(i64, Snapshot)>,
    index: HashMap<i64, usize>,
}

impl TimeSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ajoute un échantillon ; un timestamp déjà présent est écrasé sur place
    pub fn insert(&mut self, timestamp: i64, snapshot: Snapshot) {
        match self.index.get(&timestamp) {
            Some(&pos) => self.entries[pos].1 = snapshot,
            None => {
                self.index.insert(timestamp, self.entries.len());
                self.entries.push((timestamp, snapshot));
            }
        }
    }

    pub fn front(&self) -> Option<(i64, &Snapshot)> {
        self.entries.first().map(|(ts, snap)| (*ts, snap))
    }

    pub fn back(&self) -> Option<(i64, &Snapshot)> {
        self.entries.last().map(|(ts, snap)| (*ts, snap))
    }

    pub fn get(&self, timestamp: i64) -> Option<&Snapshot> {
        self.index.get(&timestamp).map(|&pos| &self.entries[pos].1)
    }

    /// Parcours depuis le début ; chaque appel repart de front()
    pub fn iter(&self) -> impl Iterator<Item = (i64, &Snapshot)> + '_ {
        self.entries.iter().map(|(ts, snap)| (*ts, snap))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Construit une série depuis un range du store.
    ///
    /// Les membres illisibles sont logués et sautés ; le second élément du
    /// tuple compte les échantillons écartés.
    pub fn from_range(range: &[ScoredMember]) -> (Self, usize) {
        let mut series = Self::new();
        let mut skipped = 0;
        for item in range {
            match decode_snapshot(&item.member) {
                Ok(snapshot) => series.insert(item.score as i64, snapshot),
                Err(e) => {
                    skipped += 1;
                    warn!(score = item.score, error = %e, "skipping undecodable sample");
                }
            }
        }
        (series, skipped)
    }

    /// Sous-série restreinte à `start <= ts <= end`
    pub fn window(&self, start: i64, end: i64) -> Self {
        let mut out = Self::new();
        for (ts, snap) in self.iter().filter(|(ts, _)| *ts >= start && *ts <= end) {
            out.insert(ts, snap.clone());
        }
        out
    }
}
