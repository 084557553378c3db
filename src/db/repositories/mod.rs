mod interactions;
mod snapshots;
