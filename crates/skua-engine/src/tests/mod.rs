mod engine_full;
