/*!
# Telemon DevKit - Stubs et Utilitaires pour Développement

Bibliothèque facilitant le développement et les tests autour du kernel :
- Stub du backing store avec journal d'appels et injection de pannes
- Builder de snapshots de télémétrie
- Harness de test branché sur un vrai `TelemetryService`
*/

pub mod snapshot_builder;
pub mod store_stub;
pub mod test_utils;

pub use snapshot_builder::SnapshotBuilder;
pub use store_stub::{StoreCall, StoreOp, StubStore};
pub use test_utils::TestHarness;
