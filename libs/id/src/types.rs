//! Typed identifier definitions.

use crate::{define_guid, define_id};

// =============================================================================
// Application Model
// =============================================================================

define_guid!(AppGuid);
define_guid!(AppVersion);

// =============================================================================
// Runtime and Instances
// =============================================================================

define_guid!(InstanceGuid);
define_guid!(NodeGuid);

// =============================================================================
// Messages
// =============================================================================

define_id!(MessageId, "msg");

// =============================================================================
// Tests
// =============================================================================
