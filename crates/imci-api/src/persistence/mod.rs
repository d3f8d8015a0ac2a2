pub mod repo_adapter;
