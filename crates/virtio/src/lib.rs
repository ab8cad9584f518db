//! VirtIO over PCI for craybond.
//!
//! Two halves: the split virtqueue rings (`queue`) and the modern
//! virtio-pci transport (`pci`) — capability walk, common-config access,
//! device status bring-up, and the synchronous command engine every
//! craybond virtio driver is built on.

#![cfg_attr(not(feature = "std"), no_std)]

pub mod pci;
pub mod queue;

pub use pci::{DeviceStatus, TransportError, VirtioPciDevice, VIRTIO_VENDOR_ID, virtio_device_id};
pub use queue::{AvailRing, DescFlags, Descriptor, QUEUE_LEN, SplitQueue, UsedElem, UsedRing};
