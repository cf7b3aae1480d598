use super::test_helpers::*;
use crate::error::Error;
use crate::process::{Script, ScriptedProcessRunner};
use crate::types::{Event, JobId, JobStatus};
use std::sync::Arc;
use std::time::Duration;
