//! Points matrix loading, seeding and operator replacement.

use std::sync::Arc;

use tracing::{info, warn};

use crate::{
    config::AppConfig,
    dao::race::RaceRepository,
    dto::admin::MatrixResponse,
    error::{EngineError, ServiceError},
    state::{
        SharedState,
        points::{MAX_CELL_POINTS, MatrixCache, PointsMatrix},
        race::Phase,
    },
};

/// Matrix of `phase`, served from the cache or loaded from the store on a miss.
pub async fn load_matrix(
    repo: &RaceRepository,
    cache: &MatrixCache,
    phase: Phase,
) -> Result<Arc<PointsMatrix>, EngineError> {
    if let Some(matrix) = cache.get(phase) {
        return Ok(matrix);
    }

    match repo.read_matrix(phase).await {
        Ok(Some(matrix)) => {
            info!(%phase, version = matrix.version, "loaded points matrix");
            Ok(cache.insert(phase, matrix))
        }
        Ok(None) => Err(EngineError::MatrixUnavailable {
            phase,
            source: None,
        }),
        Err(err) => Err(EngineError::MatrixUnavailable {
            phase,
            source: Some(err),
        }),
    }
}

/// Write the configured default matrix of every phase whose store has none.
pub async fn seed_missing_matrices(repo: &RaceRepository, config: &AppConfig) {
    for phase in Phase::ALL {
        match repo.read_matrix(phase).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                let matrix = &config.phase(phase).default_matrix;
                match repo.write_matrix(phase, matrix).await {
                    Ok(()) => info!(%phase, version = matrix.version, "seeded default points matrix"),
                    Err(err) => warn!(%phase, error = %err, "failed to seed points matrix"),
                }
            }
            Err(err) => warn!(%phase, error = %err, "stored points matrix unreadable; leaving it untouched"),
        }
    }
}

/// Replace the matrix document of `phase` and drop the cached copy.
pub async fn replace_matrix(
    state: &SharedState,
    phase: Phase,
    matrix: PointsMatrix,
) -> Result<MatrixResponse, ServiceError> {
    if matrix.ranks.contains_key(&0) {
        return Err(ServiceError::InvalidInput(
            "points matrix ranks start at 1".into(),
        ));
    }
    if let Some((rank, points)) = matrix.out_of_bounds_cell() {
        return Err(ServiceError::InvalidInput(format!(
            "rank {rank} is worth {points} points; cells must stay within ±{MAX_CELL_POINTS}"
        )));
    }

    let repo = state.repository().await?;
    repo.write_matrix(phase, &matrix).await?;
    state.matrices().invalidate(phase);
    info!(%phase, version = matrix.version, "points matrix replaced");

    Ok(MatrixResponse { phase, matrix })
}

/// Drop the cached matrix of `phase` and load it again from the store.
pub async fn reload_matrix(state: &SharedState, phase: Phase) -> Result<MatrixResponse, ServiceError> {
    let repo = state.repository().await?;
    state.matrices().invalidate(phase);
    let matrix = load_matrix(&repo, state.matrices(), phase).await?;
    Ok(MatrixResponse {
        phase,
        matrix: matrix.as_ref().clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dao::store::memory::MemoryStore,
        state::{AppState, points::PointsRow},
    };

    fn repo() -> RaceRepository {
        RaceRepository::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn missing_document_is_unavailable() {
        let repo = repo();
        let err = load_matrix(&repo, &MatrixCache::new(), Phase::A)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::MatrixUnavailable {
                phase: Phase::A,
                source: None
            }
        ));
    }

    #[tokio::test]
    async fn cached_matrix_survives_store_changes_until_invalidated() {
        let repo = repo();
        let cache = MatrixCache::new();
        repo.write_matrix(Phase::A, &PointsMatrix::default_phase_a())
            .await
            .unwrap();
        let first = load_matrix(&repo, &cache, Phase::A).await.unwrap();
        assert_eq!(first.version, 1);

        let mut bumped = PointsMatrix::default_phase_a();
        bumped.version = 2;
        repo.write_matrix(Phase::A, &bumped).await.unwrap();
        assert_eq!(load_matrix(&repo, &cache, Phase::A).await.unwrap().version, 1);

        cache.invalidate(Phase::A);
        assert_eq!(load_matrix(&repo, &cache, Phase::A).await.unwrap().version, 2);
    }

    #[tokio::test]
    async fn oversized_cells_are_rejected_before_writing() {
        let state = AppState::new(AppConfig::default());
        state.set_store(Arc::new(MemoryStore::new())).await;
        let repo = state.repository().await.unwrap();
        repo.write_matrix(Phase::A, &PointsMatrix::default_phase_a())
            .await
            .unwrap();

        let huge: PointsMatrix = serde_json::from_str(r#"{"ranks":{"1":2147483647}}"#).unwrap();
        let err = replace_matrix(&state, Phase::A, huge).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(ref message) if message.contains("rank 1")));
        assert_eq!(
            repo.read_matrix(Phase::A).await.unwrap(),
            Some(PointsMatrix::default_phase_a())
        );

        let mut edge = PointsMatrix::default_phase_a();
        edge.version = 2;
        edge.ranks.insert(1, PointsRow::Flat(MAX_CELL_POINTS));
        let replaced = replace_matrix(&state, Phase::A, edge).await.unwrap();
        assert_eq!(replaced.matrix.version, 2);
    }

    #[tokio::test]
    async fn seeding_keeps_existing_documents() {
        let repo = repo();
        let mut custom = PointsMatrix::default_phase_b();
        custom.version = 7;
        repo.write_matrix(Phase::B, &custom).await.unwrap();

        seed_missing_matrices(&repo, &AppConfig::default()).await;

        assert_eq!(
            repo.read_matrix(Phase::A).await.unwrap(),
            Some(PointsMatrix::default_phase_a())
        );
        assert_eq!(repo.read_matrix(Phase::B).await.unwrap().unwrap().version, 7);
    }
}
