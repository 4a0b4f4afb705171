// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Same-domain message passing.
//!
//! Each task holds one fixed-size inbox per potential sender. A send
//! deposits into the matching inbox, or -- when the receiver is already
//! blocked waiting for a compatible sender -- delivers straight through and
//! wakes the receiver. A synchronous delivery marks the receiver `Forced`,
//! so the scheduler elects it ahead of the regular policy exactly once; an
//! asynchronous one merely makes it runnable.
//!
//! Senders never block: a full inbox answers `Busy` and the caller
//! retries. Receivers may block (the synchronous variant); their pending
//! parameters are parked on the task until a matching message arrives.

use abi::{SysError, TaskId, TaskState, ThreadMode, IPC_MSG_MAX, NUM_TASKS};

use crate::kernel::Kernel;
use crate::task::{SchedHint, Task};
use crate::umem::USlice;

/// One inbox: a parked message from one particular sender.
#[derive(Copy, Clone, Debug)]
pub struct IpcSlot {
    pub pending: bool,
    pub len: u8,
    pub buf: [u8; IPC_MSG_MAX],
}

impl IpcSlot {
    pub const EMPTY: Self = Self {
        pending: false,
        len: 0,
        buf: [0; IPC_MSG_MAX],
    };
}

/// Parameters of a receive that had to block, parked until a sender shows
/// up.
#[derive(Copy, Clone, Debug)]
pub struct RecvWait {
    /// Accepted sender, possibly [`TaskId::ANY`].
    pub filter: TaskId,
    /// Where to store the actual sender id.
    pub sender_ptr: usize,
    /// Where the capacity was read from, and where the length is stored.
    pub len_ptr: usize,
    /// Destination buffer and its capacity.
    pub buf_ptr: usize,
    pub capacity: u32,
}

/// Validates a send/recv peer id: an existing user task, not the caller,
/// same domain.
fn check_peer(tasks: &[Task], caller: TaskId, peer: TaskId) -> Result<(), SysError> {
    if peer == caller || !peer.is_user() {
        return Err(SysError::Inval);
    }
    let p = &tasks[peer.index()];
    if !p.is_populated() {
        return Err(SysError::Inval);
    }
    if p.domain() != tasks[caller.index()].domain() {
        return Err(SysError::Inval);
    }
    Ok(())
}

impl Kernel {
    /// Implementation of the send syscalls.
    pub fn ipc_send(
        &mut self,
        caller: TaskId,
        target_raw: u32,
        len: u32,
        msg_ptr: usize,
        sync: bool,
    ) -> Result<SchedHint, SysError> {
        let target = TaskId(u8::try_from(target_raw).map_err(|_| SysError::Inval)?);
        check_peer(&self.tasks, caller, target)?;
        if len as usize > IPC_MSG_MAX {
            return Err(SysError::Inval);
        }

        // Copy the message into kernel space first; everything after this
        // point operates on validated data.
        let mut msg = [0u8; IPC_MSG_MAX];
        {
            let src = USlice::<u8>::from_raw(msg_ptr, len as usize)?;
            let sender = &self.tasks[caller.index()];
            let bytes = sender.try_read(&src, ThreadMode::Main)?;
            msg[..bytes.len()].copy_from_slice(bytes);
        }
        let len = len as usize;

        // A receiver already blocked on us takes delivery immediately.
        if let Some(wait) = self.tasks[target.index()].recv_wait {
            if wait.filter == TaskId::ANY || wait.filter == caller {
                return self.complete_recv(caller, target, &msg[..len], sync);
            }
        }

        // Otherwise the message parks in the inbox for this sender.
        let slot = &mut self.tasks[target.index()].ipc_in[caller.index()];
        if slot.pending {
            return Err(SysError::Busy);
        }
        slot.pending = true;
        slot.len = len as u8;
        slot.buf[..len].copy_from_slice(&msg[..len]);

        // An arriving message wakes an interruptible sleeper.
        self.try_wake(target);
        Ok(SchedHint::Same)
    }

    /// Implementation of the receive syscalls.
    pub fn ipc_recv(
        &mut self,
        caller: TaskId,
        sender_ptr: usize,
        len_ptr: usize,
        buf_ptr: usize,
        sync: bool,
    ) -> Result<SchedHint, SysError> {
        // The filter and capacity arrive through in/out pointers in caller
        // memory.
        let filter = {
            let slice = USlice::<u32>::from_raw(sender_ptr, 1)?;
            let t = &self.tasks[caller.index()];
            TaskId((t.try_read(&slice, ThreadMode::Main)?[0] & 0xff) as u8)
        };
        let capacity = {
            let slice = USlice::<u32>::from_raw(len_ptr, 1)?;
            let t = &self.tasks[caller.index()];
            t.try_read(&slice, ThreadMode::Main)?[0]
        };
        if filter != TaskId::ANY {
            check_peer(&self.tasks, caller, filter)?;
        }
        // Probe the destination buffer before waiting on it.
        {
            let slice =
                USlice::<u8>::from_raw(buf_ptr, capacity.min(IPC_MSG_MAX as u32) as usize)?;
            if !crate::sanitize::slice_in_ram(
                &self.tasks[caller.index()],
                &slice,
                ThreadMode::Main,
            ) {
                return Err(SysError::Inval);
            }
        }

        // Look for a parked message from an accepted sender.
        let found = {
            let inbox = &self.tasks[caller.index()].ipc_in;
            (0..NUM_TASKS)
                .filter(|&s| inbox[s].pending)
                .map(|s| TaskId(s as u8))
                .find(|&s| filter == TaskId::ANY || filter == s)
        };

        if let Some(sender) = found {
            let slot = self.tasks[caller.index()].ipc_in[sender.index()];
            let len = usize::from(slot.len);
            if capacity < len as u32 {
                return Err(SysError::Inval);
            }
            let receiver = &mut self.tasks[caller.index()];
            receiver.ipc_in[sender.index()].pending = false;
            write_recv_outputs(receiver, sender, &slot.buf[..len], sender_ptr, len_ptr, buf_ptr)?;
            return Ok(SchedHint::Same);
        }

        if !sync {
            return Err(SysError::Inval);
        }

        // Block: park the parameters and let a future send complete them.
        let receiver = &mut self.tasks[caller.index()];
        receiver.recv_wait = Some(RecvWait {
            filter,
            sender_ptr,
            len_ptr,
            buf_ptr,
            capacity,
        });
        receiver.set_state(ThreadMode::Main, TaskState::IpcRecvBlocked);
        Ok(SchedHint::Reschedule)
    }

    /// Delivers a message straight to a blocked receiver, completing its
    /// parked receive.
    fn complete_recv(
        &mut self,
        sender: TaskId,
        target: TaskId,
        msg: &[u8],
        sync: bool,
    ) -> Result<SchedHint, SysError> {
        let receiver = &mut self.tasks[target.index()];
        let wait = receiver
            .recv_wait
            .take()
            .unwrap_or_else(|| panic!("completing a receive nobody parked"));

        if wait.capacity < msg.len() as u32 {
            // The receiver's buffer can't take this message. Fail the
            // *receiver's* pending call and let the sender park normally.
            crate::syscalls::commit_result(receiver, SysError::Inval.code());
            if receiver.state(ThreadMode::Main) != TaskState::Fault {
                receiver.set_state(ThreadMode::Main, TaskState::Runnable);
            }
            return Err(SysError::Busy);
        }

        write_recv_outputs(
            receiver,
            sender,
            msg,
            wait.sender_ptr,
            wait.len_ptr,
            wait.buf_ptr,
        )?;
        crate::syscalls::commit_result(receiver, abi::STATUS_DONE);
        // A receiver whose saved frame turned out to be rotten was parked in
        // fault state by the commit; don't resurrect it.
        if receiver.state(ThreadMode::Main) != TaskState::Fault {
            receiver.set_state(
                ThreadMode::Main,
                if sync {
                    TaskState::Forced
                } else {
                    TaskState::Runnable
                },
            );
        }
        Ok(SchedHint::Reschedule)
    }
}

/// Writes the three receive outputs -- sender id, length, payload -- into
/// receiver memory.
fn write_recv_outputs(
    receiver: &mut Task,
    sender: TaskId,
    msg: &[u8],
    sender_ptr: usize,
    len_ptr: usize,
    buf_ptr: usize,
) -> Result<(), SysError> {
    {
        let mut slice = USlice::<u8>::from_raw(buf_ptr, msg.len())?;
        receiver
            .try_write(&mut slice, ThreadMode::Main)?
            .copy_from_slice(msg);
    }
    {
        let mut slice = USlice::<u32>::from_raw(sender_ptr, 1)?;
        receiver.try_write(&mut slice, ThreadMode::Main)?[0] = u32::from(sender.0);
    }
    {
        let mut slice = USlice::<u32>::from_raw(len_ptr, 1)?;
        receiver.try_write(&mut slice, ThreadMode::Main)?[0] = msg.len() as u32;
    }
    Ok(())
}
