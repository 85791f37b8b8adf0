use std::{collections::BTreeMap, sync::Arc};

use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Value, from_value, to_value};
use tracing::warn;

use crate::{
    dao::{
        models::{ActivePointerEntity, BonusAwardEntity, FinalizedFlagEntity, RankEntity},
        paths,
        storage::{StorageError, StorageResult},
        store::KvStore,
    },
    state::{
        points::PointsMatrix,
        race::{FinalizationRecord, Phase, PilotId, RaceKey, RankMap, Totals},
        sequence::StoredPointer,
    },
};

/// Typed access to every race path of the shared store.
#[derive(Clone)]
pub struct RaceRepository {
    store: Arc<dyn KvStore>,
}

impl RaceRepository {
    /// Wrap a store handle.
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Underlying store handle.
    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    // -- submissions -------------------------------------------------------

    /// Live rank submissions of the active race. Malformed entries count as cleared.
    pub async fn read_submissions(&self, phase: Phase) -> StorageResult<RankMap> {
        self.read_rank_map(&paths::submissions(phase)).await
    }

    /// Set or clear (`None`) the live rank of one pilot.
    pub async fn write_submission(
        &self,
        phase: Phase,
        pilot_id: &str,
        rank: Option<u32>,
    ) -> StorageResult<()> {
        let entity = RankEntity {
            rank: rank.map(i64::from),
        };
        self.write_as(&paths::submission(phase, pilot_id), &entity)
            .await
    }

    /// Batch entry that empties the live submissions of `phase`.
    pub fn submissions_reset(phase: Phase) -> (String, Value) {
        (paths::submissions(phase), Value::Null)
    }

    // -- active pointer ----------------------------------------------------

    /// Stored active pointer of `phase`.
    pub async fn read_pointer(&self, phase: Phase) -> StorageResult<StoredPointer> {
        let path = paths::active_pointer(phase);
        let Some(value) = self.store.read(&path).await? else {
            return Ok(StoredPointer::Missing);
        };
        match from_value::<ActivePointerEntity>(value) {
            Ok(ActivePointerEntity {
                race_key: Some(key),
            }) => Ok(StoredPointer::Race(key)),
            Ok(ActivePointerEntity { race_key: None }) => Ok(StoredPointer::Exhausted),
            Err(err) => {
                warn!(%phase, error = %err, "malformed active pointer; treating it as missing");
                Ok(StoredPointer::Missing)
            }
        }
    }

    /// Batch entry that moves the active pointer of `phase`.
    pub fn pointer_write(phase: Phase, race_key: Option<RaceKey>) -> StorageResult<(String, Value)> {
        let path = paths::active_pointer(phase);
        let value = to_value(ActivePointerEntity { race_key })
            .map_err(|source| StorageError::malformed(path.clone(), source))?;
        Ok((path, value))
    }

    /// Point `phase` at `race_key`, or mark the sequence exhausted with `None`.
    pub async fn write_pointer(&self, phase: Phase, race_key: Option<RaceKey>) -> StorageResult<()> {
        let (path, value) = Self::pointer_write(phase, race_key)?;
        self.store.write(&path, value).await
    }

    // -- finalized flags ---------------------------------------------------

    /// Finalized flag of every race of `phase` that has one.
    pub async fn read_finalized_flags(&self, phase: Phase) -> StorageResult<BTreeMap<RaceKey, bool>> {
        let flags = self
            .read_children::<FinalizedFlagEntity>(&paths::finalized_flags(phase), true)
            .await?;
        Ok(flags
            .into_iter()
            .map(|(key, flag)| (key, flag.finalized))
            .collect())
    }

    /// Whether `race_key` has been finalized. Missing flags read as false.
    pub async fn read_finalized(&self, phase: Phase, race_key: &str) -> StorageResult<bool> {
        let flag = self
            .read_as::<FinalizedFlagEntity>(&paths::finalized_flag(phase, race_key))
            .await?;
        Ok(flag.is_some_and(|flag| flag.finalized))
    }

    /// Set the finalized flag of a race.
    pub async fn write_finalized(
        &self,
        phase: Phase,
        race_key: &str,
        finalized: bool,
    ) -> StorageResult<()> {
        self.write_as(
            &paths::finalized_flag(phase, race_key),
            &FinalizedFlagEntity { finalized },
        )
        .await
    }

    // -- history -----------------------------------------------------------

    /// Finalization record of a race, if any.
    pub async fn read_record(
        &self,
        phase: Phase,
        race_key: &str,
    ) -> StorageResult<Option<FinalizationRecord>> {
        self.read_as(&paths::history_record(phase, race_key)).await
    }

    /// Every finalization record of `phase`, keyed by race.
    pub async fn read_history(
        &self,
        phase: Phase,
    ) -> StorageResult<BTreeMap<RaceKey, FinalizationRecord>> {
        self.read_children(&paths::history(phase), false).await
    }

    /// Overwrite the record of a race as a whole object.
    pub async fn write_record(&self, phase: Phase, record: &FinalizationRecord) -> StorageResult<()> {
        self.write_as(&paths::history_record(phase, &record.race_key), record)
            .await
    }

    // -- edit overlay ------------------------------------------------------

    /// Edit overlay of a past race. `None` ranks clear the pilot.
    pub async fn read_overlay(&self, phase: Phase, race_key: &str) -> StorageResult<RankMap> {
        self.read_rank_map(&paths::overlay(phase, race_key)).await
    }

    /// Correct one pilot in the overlay of a past race.
    pub async fn write_overlay_entry(
        &self,
        phase: Phase,
        race_key: &str,
        pilot_id: &str,
        rank: Option<u32>,
    ) -> StorageResult<()> {
        let entity = RankEntity {
            rank: rank.map(i64::from),
        };
        self.write_as(&paths::overlay_entry(phase, race_key, pilot_id), &entity)
            .await
    }

    /// Remove the whole overlay of a race.
    pub async fn clear_overlay(&self, phase: Phase, race_key: &str) -> StorageResult<()> {
        self.store
            .write(&paths::overlay(phase, race_key), Value::Null)
            .await
    }

    // -- doubled flags -----------------------------------------------------

    /// Doubled flags of a race, keyed by pilot.
    pub async fn read_doubled(
        &self,
        phase: Phase,
        race_key: &str,
    ) -> StorageResult<BTreeMap<PilotId, bool>> {
        self.read_children(&paths::doubled(phase, race_key), true)
            .await
    }

    /// Set the doubled flag of one pilot in a race.
    pub async fn write_doubled(
        &self,
        phase: Phase,
        race_key: &str,
        pilot_id: &str,
        doubled: bool,
    ) -> StorageResult<()> {
        self.store
            .write(
                &paths::doubled_entry(phase, race_key, pilot_id),
                Value::Bool(doubled),
            )
            .await
    }

    // -- points matrix -----------------------------------------------------

    /// Stored points matrix of `phase`.
    pub async fn read_matrix(&self, phase: Phase) -> StorageResult<Option<PointsMatrix>> {
        self.read_as(&paths::points_matrix(phase)).await
    }

    /// Replace the points matrix document of `phase`.
    pub async fn write_matrix(&self, phase: Phase, matrix: &PointsMatrix) -> StorageResult<()> {
        self.write_as(&paths::points_matrix(phase), matrix).await
    }

    // -- awards & totals ---------------------------------------------------

    /// Award name → holder for `phase`.
    pub async fn read_bonus_awards(
        &self,
        phase: Phase,
    ) -> StorageResult<BTreeMap<String, Option<PilotId>>> {
        let awards = self
            .read_children::<BonusAwardEntity>(&paths::bonus_awards(phase), true)
            .await?;
        Ok(awards
            .into_iter()
            .map(|(name, award)| (name, award.pilot_id))
            .collect())
    }

    /// Give an award to a pilot, or unset it with `None`.
    pub async fn write_bonus_award(
        &self,
        phase: Phase,
        award: &str,
        pilot_id: Option<PilotId>,
    ) -> StorageResult<()> {
        self.write_as(
            &paths::bonus_award(phase, award),
            &BonusAwardEntity { pilot_id },
        )
        .await
    }

    /// Stored totals of `phase`; empty when none were written yet.
    pub async fn read_totals(&self, phase: Phase) -> StorageResult<Totals> {
        Ok(self
            .read_as::<Totals>(&paths::totals(phase))
            .await?
            .unwrap_or_default())
    }

    /// Replace the totals of `phase` as a single unit.
    pub async fn write_totals(&self, phase: Phase, totals: &Totals) -> StorageResult<()> {
        self.write_as(&paths::totals(phase), totals).await
    }

    // -- helpers -----------------------------------------------------------

    async fn read_as<T>(&self, path: &str) -> StorageResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        match self.store.read(path).await? {
            Some(value) => from_value(value)
                .map(Some)
                .map_err(|source| StorageError::malformed(path, source)),
            None => Ok(None),
        }
    }

    /// Decode each child of the object at `path`. With `tolerant`, malformed
    /// children are logged and skipped instead of failing the whole read.
    async fn read_children<T>(&self, path: &str, tolerant: bool) -> StorageResult<BTreeMap<String, T>>
    where
        T: DeserializeOwned,
    {
        let Some(Value::Object(children)) = self.store.read(path).await? else {
            return Ok(BTreeMap::new());
        };

        let mut decoded = BTreeMap::new();
        for (key, value) in children {
            match from_value::<T>(value) {
                Ok(item) => {
                    decoded.insert(key, item);
                }
                Err(err) if tolerant => {
                    warn!(path, key = %key, error = %err, "skipping malformed store entry");
                }
                Err(source) => {
                    return Err(StorageError::malformed(format!("{path}/{key}"), source));
                }
            }
        }
        Ok(decoded)
    }

    async fn read_rank_map(&self, path: &str) -> StorageResult<RankMap> {
        let entries = self.read_children::<RankEntity>(path, true).await?;
        Ok(entries
            .into_iter()
            .map(|(pilot, entry)| (pilot, entry.rank))
            .collect())
    }

    async fn write_as<T>(&self, path: &str, value: &T) -> StorageResult<()>
    where
        T: ?Sized + Serialize,
    {
        let value = to_value(value).map_err(|source| StorageError::malformed(path, source))?;
        self.store.write(path, value).await
    }
}
