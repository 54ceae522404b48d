pub fn generate_starter_config() -> String {
    r#"# =============================================================================
# TRACESHIP CONFIGURATION
# =============================================================================
# Traceship accumulates locally queued agent log records and ships them, in
# size-bounded batches, to a remote append-only object store. A watermark
# object stored alongside the batches lets a restarted process resume exactly
# where it left off.
#
# Config file locations (in order of precedence):
#   1. Path specified via --config argument
#   2. ~/.config/traceship/config.yml
#   3. /etc/traceship/config.yml

# =============================================================================
# REMOTE OBJECT STORE (required)
# =============================================================================
remote:
  endpoint: http://localhost:8645
  # Bearer token identifying this writer. Supports $env{VAR} expansion.
  token: $env{TRACESHIP_TOKEN}
  # Per-call timeouts. Metadata calls (bucket resolve, list) vs object bodies.
  metadata_timeout: 15s
  object_timeout: 30s

# =============================================================================
# SYNCHRONIZATION (required)
# =============================================================================
sync:
  # Human-chosen bucket alias. Created on first use, never deleted.
  bucket_alias: agent-logs
  # Key prefix for batch objects and the watermark object.
  key_prefix: "reasoning/"
  # Only records of this type participate in synchronization.
  record_type: reasoning
  # How often a sync cycle runs. One cycle also runs immediately at startup.
  interval: 2m
  # Byte budget per batch object. A single record larger than the budget
  # forms its own oversized batch rather than being dropped.
  batch_size_kb: 256
  # Max records pulled from the local queue per cycle.
  fetch_limit: 1000

# =============================================================================
# LOCAL QUEUE (required)
# =============================================================================
storage:
  # DuckDB database file holding the local record queue.
  path: ~/.local/share/traceship/queue.db
"#
    .to_string()
}
